//! Bundled context plugins.
//!
//! Nothing is registered implicitly; call [`register_builtin_contexts`]
//! once at startup.

pub mod existing_users;
pub mod input_data_sources;

pub use existing_users::ExistingUsersPlugin;
pub use input_data_sources::{
    DataSourceProvisioner, DataSourceRequest, InputConfig, InputDataSourcesPlugin, InputType,
    SwiftFile,
};

use crate::cleanup::ResourceCleanupManager;
use crate::errors::ContextError;
use crate::registry::ContextRegistry;
use std::sync::Arc;

/// Registers every bundled plugin and declares their resource dependencies.
///
/// # Errors
///
/// Returns `DuplicatePlugin` if a bundled plugin is already registered.
pub fn register_builtin_contexts(
    registry: &ContextRegistry,
    provisioner: Arc<dyn DataSourceProvisioner>,
    cleanup: Arc<ResourceCleanupManager>,
) -> Result<(), ContextError> {
    cleanup.declare_dependency(
        input_data_sources::SWIFT_OBJECT,
        input_data_sources::SWIFT_CONTAINER,
    );

    registry.register(Arc::new(ExistingUsersPlugin::new()))?;
    registry.register(Arc::new(InputDataSourcesPlugin::new(provisioner, cleanup)))?;
    Ok(())
}
