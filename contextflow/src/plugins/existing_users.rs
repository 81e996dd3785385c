//! Context that injects pre-existing users into the run.

use crate::context::{ContextScope, Credential, TenantState, User};
use crate::errors::PluginError;
use crate::plugin::{ContextLifecycle, ContextPlugin, ContextSpec, SharedKey};
use crate::registry::DEFAULT_PLATFORM;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// Plugin name.
pub const NAME: &str = "existing_users";
/// Setup order.
pub const ORDER: i32 = 100;

/// One configured user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExistingUser {
    /// User id; defaults to the username.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Tenant the user belongs to.
    pub tenant_id: String,
    /// Optional tenant display name.
    #[serde(default)]
    pub tenant_name: Option<String>,
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Identity endpoint.
    #[serde(default)]
    pub auth_url: Option<String>,
}

impl ExistingUser {
    fn to_user(&self) -> User {
        let mut credential = Credential::new(&self.username, &self.password);
        credential.auth_url = self.auth_url.clone();
        User::new(
            self.user_id.as_deref().unwrap_or(&self.username),
            &self.tenant_id,
            credential,
        )
    }
}

fn config_schema() -> serde_json::Value {
    json!({
        "type": "array",
        "minItems": 1,
        "items": {
            "type": "object",
            "properties": {
                "user_id": {"type": "string"},
                "tenant_id": {"type": "string"},
                "tenant_name": {"type": "string"},
                "username": {"type": "string"},
                "password": {"type": "string"},
                "auth_url": {"type": "string"}
            },
            "required": ["tenant_id", "username", "password"],
            "additionalProperties": false
        }
    })
}

/// Registers users that already exist in the cloud.
///
/// Visible from every platform. Cleanup removes exactly the users and
/// tenants this plugin added; entries that were already present are kept.
#[derive(Debug)]
pub struct ExistingUsersPlugin {
    spec: ContextSpec,
    schema: serde_json::Value,
}

impl ExistingUsersPlugin {
    /// Creates the plugin.
    #[must_use]
    pub fn new() -> Self {
        Self {
            spec: ContextSpec::new(NAME, DEFAULT_PLATFORM, ORDER)
                .with_shared_key(SharedKey::Users)
                .with_shared_key(SharedKey::Tenants)
                .with_description("Adds pre-existing users and their tenants to the run"),
            schema: config_schema(),
        }
    }
}

impl Default for ExistingUsersPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextPlugin for ExistingUsersPlugin {
    fn spec(&self) -> &ContextSpec {
        &self.spec
    }

    fn config_schema(&self) -> Option<&serde_json::Value> {
        Some(&self.schema)
    }

    fn create(&self, config: serde_json::Value) -> Result<Box<dyn ContextLifecycle>, PluginError> {
        let users: Vec<ExistingUser> = serde_json::from_value(config)
            .map_err(|err| PluginError::invalid_state(format!("invalid {NAME} config: {err}")))?;
        Ok(Box::new(ExistingUsers { users }))
    }
}

struct ExistingUsers {
    users: Vec<ExistingUser>,
}

fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ContextLifecycle for ExistingUsers {
    async fn setup(&mut self, mut scope: ContextScope<'_>) -> Result<(), PluginError> {
        let mut added_tenants = Vec::new();
        let tenants = scope.tenants_mut()?;
        for configured in &self.users {
            if !tenants.contains_key(&configured.tenant_id) {
                let mut tenant = TenantState::new(&configured.tenant_id);
                tenant.name = configured.tenant_name.clone();
                tenants.insert(configured.tenant_id.clone(), tenant);
                added_tenants.push(configured.tenant_id.clone());
            }
        }

        let mut added_users = Vec::new();
        let users = scope.users_mut()?;
        for configured in &self.users {
            let user = configured.to_user();
            if !users.iter().any(|existing| existing.id == user.id) {
                added_users.push(user.id.clone());
                users.push(user);
            }
        }

        info!(
            users = added_users.len(),
            tenants = added_tenants.len(),
            "Registered existing users"
        );
        *scope.namespace_mut() = json!({"users": added_users, "tenants": added_tenants});
        Ok(())
    }

    async fn cleanup(&mut self, mut scope: ContextScope<'_>) -> Result<(), PluginError> {
        let Some(added) = scope.remove_namespace() else {
            return Ok(());
        };
        let users = string_list(added.get("users"));
        let tenants = string_list(added.get("tenants"));

        scope.users_mut()?.retain(|user| !users.contains(&user.id));
        scope.tenants_mut()?.retain(|id, _| !tenants.contains(id));
        Ok(())
    }
}
