//! The mutable mapping shared by every plugin of one run.

use super::{iterate_per_tenant, ContextConfig, RunIdentity};
use crate::cleanup::Owner;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Credentials of one provisioned or pre-existing user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Login name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Identity endpoint, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
}

impl Credential {
    /// Creates a credential.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            auth_url: None,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"***")
            .field("auth_url", &self.auth_url)
            .finish()
    }
}

/// A user the run may act as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: String,
    /// Tenant (project) the user belongs to.
    pub tenant_id: String,
    /// Login credential.
    pub credential: Credential,
}

impl User {
    /// Creates a user.
    #[must_use]
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>, credential: Credential) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            credential,
        }
    }

    /// The cleanup owner identity of this user.
    #[must_use]
    pub fn owner(&self) -> Owner {
        Owner::new(&self.id, &self.tenant_id).with_credential(self.credential.clone())
    }
}

/// Per-tenant state. Each plugin owns the namespace keyed by its name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TenantState {
    /// Tenant id.
    pub id: String,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Plugin namespaces.
    #[serde(default)]
    pub namespaces: BTreeMap<String, serde_json::Value>,
}

impl TenantState {
    /// Creates an empty tenant entry.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// The single mutable mapping shared across all plugin instances of a run.
///
/// Plugins never touch it directly; they get a
/// [`ContextScope`](super::ContextScope) that limits writes to the keys
/// they own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub(crate) identity: RunIdentity,
    pub(crate) config: ContextConfig,
    pub(crate) users: Vec<User>,
    pub(crate) tenants: BTreeMap<String, TenantState>,
    pub(crate) namespaces: BTreeMap<String, serde_json::Value>,
}

impl RunContext {
    /// Creates an empty run context.
    #[must_use]
    pub fn new(identity: RunIdentity) -> Self {
        Self {
            identity,
            config: ContextConfig::new(),
            users: Vec::new(),
            tenants: BTreeMap::new(),
            namespaces: BTreeMap::new(),
        }
    }

    /// Adds pre-existing users, creating tenant entries as needed.
    #[must_use]
    pub fn with_users(mut self, users: impl IntoIterator<Item = User>) -> Self {
        for user in users {
            self.tenants
                .entry(user.tenant_id.clone())
                .or_insert_with(|| TenantState::new(&user.tenant_id));
            self.users.push(user);
        }
        self
    }

    /// Returns the run identity.
    #[must_use]
    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Owner id of the run (task or verifier uuid).
    #[must_use]
    pub fn owner_id(&self) -> String {
        self.identity.owner_id()
    }

    /// The context configuration of the run.
    #[must_use]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub(crate) fn set_config(&mut self, config: ContextConfig) {
        self.config = config;
    }

    /// All users.
    #[must_use]
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// All tenants.
    #[must_use]
    pub fn tenants(&self) -> &BTreeMap<String, TenantState> {
        &self.tenants
    }

    /// A single tenant.
    #[must_use]
    pub fn tenant(&self, tenant_id: &str) -> Option<&TenantState> {
        self.tenants.get(tenant_id)
    }

    /// A plugin's top-level namespace.
    #[must_use]
    pub fn namespace(&self, plugin: &str) -> Option<&serde_json::Value> {
        self.namespaces.get(plugin)
    }

    /// A plugin's namespace inside a tenant.
    #[must_use]
    pub fn tenant_namespace(&self, tenant_id: &str, plugin: &str) -> Option<&serde_json::Value> {
        self.tenants
            .get(tenant_id)
            .and_then(|tenant| tenant.namespaces.get(plugin))
    }

    /// Cleanup owners for every user of the run.
    #[must_use]
    pub fn owners(&self) -> Vec<Owner> {
        self.users.iter().map(User::owner).collect()
    }

    /// One cleanup owner per tenant, using the tenant's first user.
    #[must_use]
    pub fn tenant_owners(&self) -> Vec<Owner> {
        iterate_per_tenant(&self.users)
            .into_iter()
            .map(|(user, _)| user.owner())
            .collect()
    }

    /// Renders the context as JSON for reports and debugging.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(RunIdentity::default())
    }
}
