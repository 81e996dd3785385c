//! Plugin-scoped view of the run context.

use super::{iterate_per_tenant, RunContext, TenantState, User};
use crate::cleanup::Owner;
use crate::errors::PluginError;
use crate::plugin::{ContextSpec, SharedKey};
use futures::future::{join_all, BoxFuture};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Exclusive handle to one tenant's sub-namespace during a fan-out.
pub struct TenantSlot<'s> {
    /// The tenant being processed.
    pub tenant_id: &'s str,
    /// The tenant's representative user.
    pub user: &'s User,
    /// The plugin's namespace inside this tenant.
    pub data: &'s mut serde_json::Value,
}

/// The view of a [`RunContext`] handed to one plugin.
///
/// Everything is readable. Writes are limited to the plugin's own
/// namespace, its per-tenant namespaces, and the shared keys its
/// [`ContextSpec`] declares.
pub struct ContextScope<'a> {
    ctx: &'a mut RunContext,
    spec: &'a ContextSpec,
}

impl<'a> ContextScope<'a> {
    /// Binds a run context to a plugin.
    pub fn new(ctx: &'a mut RunContext, spec: &'a ContextSpec) -> Self {
        Self { ctx, spec }
    }

    /// The owning plugin's name.
    #[must_use]
    pub fn plugin_name(&self) -> &str {
        &self.spec.name
    }

    /// Read-only access to the whole run context.
    #[must_use]
    pub fn run(&self) -> &RunContext {
        self.ctx
    }

    /// Owner id of the run.
    #[must_use]
    pub fn owner_id(&self) -> String {
        self.ctx.owner_id()
    }

    /// All users of the run.
    #[must_use]
    pub fn users(&self) -> &[User] {
        &self.ctx.users
    }

    /// Cleanup owners for every user of the run.
    #[must_use]
    pub fn owners(&self) -> Vec<Owner> {
        self.ctx.owners()
    }

    /// One cleanup owner per tenant.
    #[must_use]
    pub fn tenant_owners(&self) -> Vec<Owner> {
        self.ctx.tenant_owners()
    }

    /// The plugin's own namespace.
    #[must_use]
    pub fn namespace(&self) -> Option<&serde_json::Value> {
        self.ctx.namespaces.get(&self.spec.name)
    }

    /// Mutable access to the plugin's own namespace, created on first use.
    pub fn namespace_mut(&mut self) -> &mut serde_json::Value {
        self.ctx
            .namespaces
            .entry(self.spec.name.clone())
            .or_insert_with(empty_object)
    }

    /// Removes the plugin's own namespace.
    pub fn remove_namespace(&mut self) -> Option<serde_json::Value> {
        self.ctx.namespaces.remove(&self.spec.name)
    }

    /// The plugin's namespace inside a tenant.
    #[must_use]
    pub fn tenant_namespace(&self, tenant_id: &str) -> Option<&serde_json::Value> {
        self.ctx.tenant_namespace(tenant_id, &self.spec.name)
    }

    /// Mutable access to the plugin's namespace inside an existing tenant.
    pub fn tenant_namespace_mut(
        &mut self,
        tenant_id: &str,
    ) -> Result<&mut serde_json::Value, PluginError> {
        let tenant = self
            .ctx
            .tenants
            .get_mut(tenant_id)
            .ok_or_else(|| PluginError::invalid_state(format!("unknown tenant '{tenant_id}'")))?;
        Ok(tenant
            .namespaces
            .entry(self.spec.name.clone())
            .or_insert_with(empty_object))
    }

    /// Removes the plugin's namespace from every tenant. Returns how many
    /// tenants had one.
    pub fn remove_tenant_namespaces(&mut self) -> usize {
        let name = &self.spec.name;
        self.ctx
            .tenants
            .values_mut()
            .filter_map(|tenant| tenant.namespaces.remove(name))
            .count()
    }

    /// Mutable access to the shared `users` list.
    pub fn users_mut(&mut self) -> Result<&mut Vec<User>, PluginError> {
        self.require(SharedKey::Users)?;
        Ok(&mut self.ctx.users)
    }

    /// Mutable access to the shared `tenants` map.
    pub fn tenants_mut(&mut self) -> Result<&mut BTreeMap<String, TenantState>, PluginError> {
        self.require(SharedKey::Tenants)?;
        Ok(&mut self.ctx.tenants)
    }

    fn require(&self, key: SharedKey) -> Result<(), PluginError> {
        if self.spec.may_write(key) {
            Ok(())
        } else {
            Err(PluginError::namespace_violation(&self.spec.name, key.to_string()))
        }
    }

    /// Runs `unit` concurrently once per distinct tenant.
    ///
    /// Each unit gets exclusive access to this plugin's namespace inside
    /// its own tenant, so no two units can touch the same key. All units
    /// are awaited before returning; the first error in tenant order is
    /// returned and the others are logged. On success returns the number
    /// of tenants processed.
    ///
    /// Units must not borrow from the caller; clone `Arc`s into them.
    pub async fn fan_out_per_tenant<F>(&mut self, unit: F) -> Result<usize, PluginError>
    where
        F: for<'s> Fn(TenantSlot<'s>) -> BoxFuture<'s, Result<(), PluginError>> + Send + Sync,
    {
        let plugin = self.spec.name.clone();
        let RunContext { users, tenants, .. } = &mut *self.ctx;
        let users: &[User] = users;

        let representatives = iterate_per_tenant(users);
        for (_, tenant_id) in &representatives {
            tenants
                .entry((*tenant_id).to_string())
                .or_insert_with(|| TenantState::new(*tenant_id));
        }
        let by_tenant: HashMap<&str, &User> = representatives
            .iter()
            .map(|(user, tenant_id)| (*tenant_id, *user))
            .collect();

        let mut tenant_ids = Vec::new();
        let mut units = Vec::new();
        for (tenant_id, state) in tenants.iter_mut() {
            let Some(user) = by_tenant.get(tenant_id.as_str()).copied() else {
                continue;
            };
            let data = state
                .namespaces
                .entry(plugin.clone())
                .or_insert_with(empty_object);
            tenant_ids.push(tenant_id.clone());
            units.push(unit(TenantSlot {
                tenant_id,
                user,
                data,
            }));
        }

        let results = join_all(units).await;

        let mut completed = 0;
        let mut first_error = None;
        for (tenant_id, result) in tenant_ids.into_iter().zip(results) {
            match result {
                Ok(()) => completed += 1,
                Err(err) => {
                    warn!(plugin = %plugin, tenant = %tenant_id, error = %err, "Per-tenant unit failed");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        first_error.map_or(Ok(completed), Err)
    }
}
