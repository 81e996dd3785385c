//! Resource ownership types.

use crate::context::Credential;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A cloud identity resources are created under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// User id.
    pub user_id: String,
    /// Tenant id.
    pub tenant_id: String,
    /// Credential the collaborator authenticates with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
}

impl Owner {
    /// Creates an owner without credentials.
    #[must_use]
    pub fn new(user_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            credential: None,
        }
    }

    /// Attaches a credential.
    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.tenant_id)
    }
}

/// Identifies one externally created resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHandle {
    /// Resource type tag (e.g. `swift.container`).
    pub resource_type: String,
    /// Provider-specific id.
    pub id: String,
    /// Provider-side name, if the resource has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Owning user id.
    pub user_id: String,
    /// Owning tenant id.
    pub tenant_id: String,
    /// Owner id of the run that created it.
    pub task_id: String,
}

impl ResourceHandle {
    /// Creates a handle for a resource created by `owner` during `task_id`.
    #[must_use]
    pub fn new(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        owner: &Owner,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            name: None,
            user_id: owner.user_id.clone(),
            tenant_id: owner.tenant_id.clone(),
            task_id: task_id.into(),
        }
    }

    /// Sets the provider-side name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns true if the resource is visible to `owner`.
    #[must_use]
    pub fn is_visible_to(&self, owner: &Owner) -> bool {
        self.tenant_id == owner.tenant_id
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.id)
    }
}
