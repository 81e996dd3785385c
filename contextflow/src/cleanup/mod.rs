//! Run-scoped resource bookkeeping and cleanup.
//!
//! This module provides:
//! - `ResourceHandle`/`Owner` to identify created resources
//! - `ResourceManager`, the per-type leaf collaborator contract
//! - `ResourceCleanupManager` for best-effort, aggregated deletion
//! - `TagDependencies` for declared cross-type deletion order

mod handle;
mod manager;
mod ordering;

pub use handle::{Owner, ResourceHandle};
pub use manager::{
    CleanupConfig, CleanupStats, ResourceCleanupError, ResourceCleanupManager, ResourceError,
    ResourceFailure, ResourceManager,
};
pub use ordering::TagDependencies;
