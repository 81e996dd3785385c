//! Error types for the contextflow engine.
//!
//! The taxonomy follows the lifecycle of a run: registration errors
//! surface at process start, resolution and validation errors before the
//! run, setup failures abort the run, and cleanup failures are collected
//! as warnings that never mask the primary result.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::cleanup::ResourceCleanupError;

/// The main error type for contextflow operations.
#[derive(Debug, Error)]
pub enum ContextError {
    /// No plugin is registered for the name/platform combination.
    #[error("Context plugin '{name}' not found for platform '{platform}'")]
    PluginNotFound {
        /// The requested plugin name.
        name: String,
        /// The requested platform.
        platform: String,
    },

    /// A plugin with the same key is already registered.
    #[error("Context plugin '{name}' already registered for platform '{platform}' (hidden={hidden})")]
    DuplicatePlugin {
        /// The plugin name.
        name: String,
        /// The platform tag.
        platform: String,
        /// Whether the conflicting entry is hidden.
        hidden: bool,
    },

    /// One or more plugin configurations failed validation.
    #[error("{0}")]
    InvalidConfig(#[from] InvalidConfigError),

    /// A plugin setup failed and the run was rolled back.
    #[error("{0}")]
    Setup(#[from] SetupFailure),

    /// The run was cancelled before the action started.
    #[error("Run cancelled: {0}")]
    Cancelled(String),
}

impl ContextError {
    /// Creates a plugin not found error.
    #[must_use]
    pub fn not_found(name: impl Into<String>, platform: impl Into<String>) -> Self {
        Self::PluginNotFound {
            name: name.into(),
            platform: platform.into(),
        }
    }

    /// Creates a duplicate plugin error.
    #[must_use]
    pub fn duplicate(name: impl Into<String>, platform: impl Into<String>, hidden: bool) -> Self {
        Self::DuplicatePlugin {
            name: name.into(),
            platform: platform.into(),
            hidden,
        }
    }

    /// Returns diagnostic metadata for the error.
    #[must_use]
    pub fn error_info(&self) -> ErrorInfo {
        match self {
            Self::PluginNotFound { name, platform } => {
                ErrorInfo::new("CONTEXT-001-NOT_FOUND", self.to_string())
                    .with_fix_hint(
                        "Check the plugin name for typos and make sure the plugin was \
                         registered for this platform before the run started.",
                    )
                    .with_context_entry("plugin", name)
                    .with_context_entry("platform", platform)
            }
            Self::DuplicatePlugin { name, platform, .. } => {
                ErrorInfo::new("CONTEXT-002-DUPLICATE", self.to_string())
                    .with_fix_hint("Rename one of the plugins or register it for another platform.")
                    .with_context_entry("plugin", name)
                    .with_context_entry("platform", platform)
            }
            Self::InvalidConfig(err) => {
                let plugins: Vec<String> = err.plugins();
                ErrorInfo::new("CONTEXT-003-INVALID_CONFIG", self.to_string())
                    .with_fix_hint("Fix every listed violation; all of them were collected.")
                    .with_context_entry("plugins", plugins.join(","))
                    .with_context_entry("violations", err.violations.len().to_string())
            }
            Self::Setup(failure) => ErrorInfo::new("CONTEXT-004-SETUP", self.to_string())
                .with_context_entry("plugin", &failure.plugin)
                .with_context_entry("position", failure.position.to_string())
                .with_context_entry("order", failure.order.to_string()),
            Self::Cancelled(_) => ErrorInfo::new("CONTEXT-005-CANCELLED", self.to_string()),
        }
    }
}

/// Metadata about an error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Error code (e.g., "CONTEXT-001-NOT_FOUND").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::Value::String(self.code.clone()));
        map.insert("summary".to_string(), serde_json::Value::String(self.summary.clone()));

        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::Value::String(hint.clone()));
        }
        if !self.context.is_empty() {
            let context_map: serde_json::Map<String, serde_json::Value> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            map.insert("context".to_string(), serde_json::Value::Object(context_map));
        }

        map
    }
}

/// A single schema violation found in a plugin configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// The plugin whose configuration is invalid.
    pub plugin: String,
    /// Pointer to the offending value (e.g. `/swift_files/0/name`).
    pub path: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(
        plugin: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{} at '{}': {}", self.plugin, path, self.message)
    }
}

/// Every violation collected while validating a context configuration.
#[derive(Debug, Clone, Error)]
#[error("Invalid context config ({} violation(s)): {}", .violations.len(), render_violations(.violations))]
pub struct InvalidConfigError {
    /// All violations, in plugin-name order.
    pub violations: Vec<ValidationError>,
}

impl InvalidConfigError {
    /// Creates a new invalid config error.
    #[must_use]
    pub fn new(violations: Vec<ValidationError>) -> Self {
        Self { violations }
    }

    /// Names of the plugins with at least one violation.
    #[must_use]
    pub fn plugins(&self) -> Vec<String> {
        let mut plugins: Vec<String> = self.violations.iter().map(|v| v.plugin.clone()).collect();
        plugins.dedup();
        plugins
    }
}

fn render_violations(violations: &[ValidationError]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure raised by a plugin's own setup or cleanup code.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The provisioning collaborator failed.
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    /// The plugin tried to write outside of the keys it owns.
    #[error("Plugin '{plugin}' may not write '{key}'")]
    NamespaceViolation {
        /// The offending plugin.
        plugin: String,
        /// The key it tried to write.
        key: String,
    },

    /// The run context is not in the shape the plugin expects.
    #[error("Invalid run context state: {0}")]
    InvalidState(String),

    /// Cleanup delegated to the resource cleanup manager failed.
    #[error("{0}")]
    ResourceCleanup(#[from] ResourceCleanupError),

    /// Any other failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PluginError {
    /// Creates a provisioning error.
    #[must_use]
    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::Provisioning(message.into())
    }

    /// Creates a namespace violation error.
    #[must_use]
    pub fn namespace_violation(plugin: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NamespaceViolation {
            plugin: plugin.into(),
            key: key.into(),
        }
    }

    /// Creates an invalid state error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }
}

/// Why a plugin setup did not complete.
#[derive(Debug, Error)]
pub enum SetupCause {
    /// The plugin returned an error.
    #[error("{0}")]
    Plugin(#[from] PluginError),

    /// The plugin exceeded the configured setup deadline.
    #[error("setup timed out after {0:?}")]
    TimedOut(Duration),

    /// The run was cancelled before the plugin could start.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

/// A failed setup, wrapped with the failing plugin's position in the order.
#[derive(Debug, Error)]
#[error("Setup of context '{plugin}' (position {position}, order {order}) failed: {cause}")]
pub struct SetupFailure {
    /// The failing plugin.
    pub plugin: String,
    /// 1-based position in the sorted setup sequence.
    pub position: usize,
    /// The plugin's declared order.
    pub order: i32,
    /// The configuration value the plugin was given.
    pub config: serde_json::Value,
    /// The underlying failure.
    #[source]
    pub cause: SetupCause,
    /// Cleanup failures encountered while rolling back earlier plugins.
    pub rollback_failures: Vec<CleanupFailure>,
}

/// A cleanup that failed or overran its deadline. Never fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupFailure {
    /// The plugin whose cleanup failed.
    pub plugin: String,
    /// 1-based position in the sorted setup sequence.
    pub position: usize,
    /// Rendered error message.
    pub message: String,
    /// Whether the failure was a deadline overrun.
    pub timed_out: bool,
}

impl CleanupFailure {
    /// Creates a cleanup failure from an error message.
    #[must_use]
    pub fn new(plugin: impl Into<String>, position: usize, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            position,
            message: message.into(),
            timed_out: false,
        }
    }

    /// Creates a cleanup failure for a deadline overrun.
    #[must_use]
    pub fn timed_out(plugin: impl Into<String>, position: usize, deadline: Duration) -> Self {
        Self {
            plugin: plugin.into(),
            position,
            message: format!("cleanup exceeded deadline of {deadline:?}"),
            timed_out: true,
        }
    }
}

impl std::fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (position {}): {}", self.plugin, self.position, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_creation() {
        let info = ErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("plugin", "users");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("plugin"), Some(&"users".to_string()));

        let dict = info.to_dict();
        assert_eq!(dict.get("code").unwrap(), "TEST-001");
        assert!(dict.contains_key("context"));
    }

    #[test]
    fn test_not_found_error_info() {
        let err = ContextError::not_found("ghost", "openstack");
        assert!(err.to_string().contains("ghost"));

        let info = err.error_info();
        assert_eq!(info.code, "CONTEXT-001-NOT_FOUND");
        assert_eq!(info.context.get("platform"), Some(&"openstack".to_string()));
    }

    #[test]
    fn test_every_variant_has_a_stable_code() {
        let codes: Vec<String> = [
            ContextError::not_found("ghost", "openstack"),
            ContextError::duplicate("users", "default", false),
            InvalidConfigError::new(vec![ValidationError::new("a", "", "bad")]).into(),
            ContextError::Cancelled("stop".to_string()),
        ]
        .iter()
        .map(|err| err.error_info().code)
        .collect();

        assert_eq!(
            codes,
            vec![
                "CONTEXT-001-NOT_FOUND",
                "CONTEXT-002-DUPLICATE",
                "CONTEXT-003-INVALID_CONFIG",
                "CONTEXT-005-CANCELLED",
            ]
        );
    }

    #[test]
    fn test_invalid_config_lists_every_violation() {
        let err = InvalidConfigError::new(vec![
            ValidationError::new("a", "/input_url", "is required"),
            ValidationError::new("a", "/input_type", "must be one of [\"swift\",\"hdfs\"]"),
            ValidationError::new("b", "", "must be an object"),
        ]);

        let message = err.to_string();
        assert!(message.contains("3 violation(s)"));
        assert!(message.contains("a at '/input_url': is required"));
        assert!(message.contains("b at '/': must be an object"));
        assert_eq!(err.plugins(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_setup_failure_names_plugin_and_position() {
        let failure = SetupFailure {
            plugin: "input_data_sources".to_string(),
            position: 2,
            order: 443,
            config: serde_json::json!({"input_type": "hdfs"}),
            cause: SetupCause::Plugin(PluginError::provisioning("quota exceeded")),
            rollback_failures: Vec::new(),
        };

        let message = failure.to_string();
        assert!(message.contains("'input_data_sources'"));
        assert!(message.contains("position 2"));
        assert!(message.contains("quota exceeded"));

        let err = ContextError::from(failure);
        assert_eq!(err.error_info().code, "CONTEXT-004-SETUP");
    }

    #[test]
    fn test_cleanup_failure_timed_out() {
        let failure = CleanupFailure::timed_out("slow", 3, Duration::from_millis(50));
        assert!(failure.timed_out);
        assert!(failure.to_string().starts_with("slow (position 3)"));
    }
}
