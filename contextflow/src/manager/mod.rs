//! Context managers.
//!
//! A [`ContextManager`] resolves the configured plugins, validates their
//! configuration, sets them up in `(order, name)` order, runs the action
//! exactly once and always cleans up in reverse.
//!
//! [`ContextStack`] exposes the setup/cleanup halves for callers that drive
//! the action themselves.

mod config;
mod integration_tests;
#[allow(clippy::module_inception)]
mod manager;
mod report;
mod stack;

pub use config::ManagerConfig;
pub use manager::ContextManager;
pub use report::{ActionOutcome, RunReport};
pub use stack::ContextStack;
