//! Run context: the state shared by all plugins of one run.

mod identity;
mod run_context;
mod scope;
mod tenants;

pub use identity::{RunIdentity, RunKind};
pub use run_context::{Credential, RunContext, TenantState, User};
pub use scope::{ContextScope, TenantSlot};
pub use tenants::iterate_per_tenant;

use std::collections::BTreeMap;

/// Configuration of a run: plugin name to that plugin's config value.
pub type ContextConfig = BTreeMap<String, serde_json::Value>;
