//! Configuration of context managers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Deadlines applied by a [`ContextManager`](super::ContextManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Deadline for each plugin's cleanup, in seconds.
    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_seconds: f64,
    /// Deadline for each plugin's setup, in seconds.
    #[serde(default)]
    pub setup_timeout_seconds: Option<f64>,
    /// Deadline for the action, in seconds.
    #[serde(default)]
    pub action_timeout_seconds: Option<f64>,
}

fn default_cleanup_timeout() -> f64 {
    120.0
}

/// Converts seconds to a deadline. Negative and NaN mean zero; values too
/// large for a `Duration` mean no practical deadline.
fn deadline(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cleanup_timeout_seconds: default_cleanup_timeout(),
            setup_timeout_seconds: None,
            action_timeout_seconds: None,
        }
    }
}

impl ManagerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-plugin cleanup deadline.
    #[must_use]
    pub fn with_cleanup_timeout(mut self, seconds: f64) -> Self {
        self.cleanup_timeout_seconds = seconds;
        self
    }

    /// Sets the per-plugin setup deadline.
    #[must_use]
    pub fn with_setup_timeout(mut self, seconds: f64) -> Self {
        self.setup_timeout_seconds = Some(seconds);
        self
    }

    /// Sets the action deadline.
    #[must_use]
    pub fn with_action_timeout(mut self, seconds: f64) -> Self {
        self.action_timeout_seconds = Some(seconds);
        self
    }

    /// Gets the cleanup deadline as Duration.
    #[must_use]
    pub fn cleanup_timeout(&self) -> Duration {
        deadline(self.cleanup_timeout_seconds)
    }

    /// Gets the setup deadline as Duration, if any.
    #[must_use]
    pub fn setup_timeout(&self) -> Option<Duration> {
        self.setup_timeout_seconds.map(deadline)
    }

    /// Gets the action deadline as Duration, if any.
    #[must_use]
    pub fn action_timeout(&self) -> Option<Duration> {
        self.action_timeout_seconds.map(deadline)
    }
}
