//! # Contextflow
//!
//! Ordered setup and teardown of the ancillary state a benchmark run needs.
//!
//! A run is configured with a mapping from context plugin name to that
//! plugin's configuration. Contextflow provides:
//!
//! - **Deterministic ordering**: plugins set up by ascending `(order, name)`
//!   and clean up in exactly the reverse of the setups that succeeded
//! - **Rollback**: a failing setup cleans up everything set up before it
//! - **Unconditional cleanup**: after the action succeeds, fails, panics,
//!   times out or is cancelled
//! - **Namespace ownership**: each plugin writes only its own keys, with
//!   race-free per-tenant fan-out
//! - **Resource cleanup**: best-effort, aggregated deletion of everything a
//!   run created, in declared dependency order
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use contextflow::prelude::*;
//!
//! let registry = Arc::new(ContextRegistry::new());
//! register_builtin_contexts(&registry, provisioner, cleanup)?;
//!
//! let manager = ContextManager::for_task(registry, "openstack");
//! let report = manager
//!     .run(&config, &mut ctx, |ctx| async move { run_benchmark(ctx).await }.boxed())
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod cleanup;
pub mod context;
pub mod errors;
pub mod events;
pub mod manager;
pub mod observability;
pub mod plugin;
pub mod registry;
pub mod schema;
pub mod testing;
pub mod utils;

#[cfg(feature = "builtin")]
pub mod plugins;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::cleanup::{
        CleanupConfig, Owner, ResourceCleanupManager, ResourceHandle, ResourceManager,
    };
    pub use crate::context::{
        ContextConfig, ContextScope, Credential, RunContext, RunIdentity, RunKind, User,
    };
    pub use crate::errors::{
        CleanupFailure, ContextError, ErrorInfo, PluginError, SetupFailure, ValidationError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::manager::{ActionOutcome, ContextManager, ContextStack, ManagerConfig, RunReport};
    pub use crate::plugin::{ContextLifecycle, ContextPlugin, ContextSpec, SharedKey};
    pub use crate::registry::{get_context_registry, ContextRegistry, DEFAULT_PLATFORM};

    #[cfg(feature = "builtin")]
    pub use crate::plugins::{register_builtin_contexts, DataSourceProvisioner};
}
