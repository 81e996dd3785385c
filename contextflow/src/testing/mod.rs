//! Testing utilities for context plugins and managers.
//!
//! This module provides:
//! - `RecordingContext` plugins that journal their lifecycle calls
//! - `InMemoryResources`, an in-memory cloud for cleanup tests

mod recording;
mod resources;

pub use recording::{Journal, RecordingContext};
pub use resources::InMemoryResources;
