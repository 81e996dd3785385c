//! Context plugin contract.
//!
//! A plugin is split in two halves:
//!
//! - [`ContextPlugin`] is the registered, immutable side: it carries the
//!   [`ContextSpec`], validates configuration and produces instances.
//! - [`ContextLifecycle`] is the live side bound to one validated config
//!   slice: it runs `setup` and `cleanup` against a [`ContextScope`].
//!
//! [`ContextInstance`] pairs a live lifecycle with its spec and is totally
//! ordered by `(order, name)`.

pub mod order;

use crate::context::{ContextScope, RunContext};
use crate::errors::{PluginError, ValidationError};
use crate::schema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Shared top-level run context keys a plugin may be allowed to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedKey {
    /// The `users` list.
    Users,
    /// The `tenants` map.
    Tenants,
}

impl fmt::Display for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Users => write!(f, "users"),
            Self::Tenants => write!(f, "tenants"),
        }
    }
}

/// Registry key of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextKey {
    /// Plugin name.
    pub name: String,
    /// Platform tag.
    pub platform: String,
    /// Whether the plugin is hidden.
    pub hidden: bool,
}

/// Immutable per-plugin metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSpec {
    /// Unique name within a platform and visibility scope.
    pub name: String,
    /// Platform tag (e.g. a cloud family).
    pub platform: String,
    /// Setup priority; lower runs first.
    pub order: i32,
    /// Hidden plugins are only resolvable by trusted internal managers.
    #[serde(default)]
    pub hidden: bool,
    /// Shared top-level keys this plugin may write.
    #[serde(default)]
    pub shared_keys: Vec<SharedKey>,
    /// Optional human readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ContextSpec {
    /// Creates a new visible spec.
    #[must_use]
    pub fn new(name: impl Into<String>, platform: impl Into<String>, order: i32) -> Self {
        Self {
            name: name.into(),
            platform: platform.into(),
            order,
            hidden: false,
            shared_keys: Vec::new(),
            description: None,
        }
    }

    /// Marks the plugin as hidden.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Allows the plugin to write a shared top-level key.
    #[must_use]
    pub fn with_shared_key(mut self, key: SharedKey) -> Self {
        if !self.shared_keys.contains(&key) {
            self.shared_keys.push(key);
        }
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns true if the plugin may write the given shared key.
    #[must_use]
    pub fn may_write(&self, key: SharedKey) -> bool {
        self.shared_keys.contains(&key)
    }

    /// Returns the registry key.
    #[must_use]
    pub fn key(&self) -> ContextKey {
        ContextKey {
            name: self.name.clone(),
            platform: self.platform.clone(),
            hidden: self.hidden,
        }
    }

    /// The total-order sort key.
    #[must_use]
    pub fn sort_key(&self) -> (i32, &str) {
        (self.order, self.name.as_str())
    }
}

/// The registered side of a context plugin.
///
/// Implementations are stateless factories: validation is pure and each
/// run gets fresh instances from [`ContextPlugin::create`].
pub trait ContextPlugin: Send + Sync {
    /// Returns the plugin metadata.
    fn spec(&self) -> &ContextSpec;

    /// JSON schema of the accepted configuration, if any.
    fn config_schema(&self) -> Option<&serde_json::Value> {
        None
    }

    /// Validates a configuration value without side effects.
    ///
    /// The default implementation checks the value against
    /// [`ContextPlugin::config_schema`].
    fn validate(&self, config: &serde_json::Value) -> Vec<ValidationError> {
        match self.config_schema() {
            Some(config_schema) => schema::validate(&self.spec().name, config_schema, config),
            None => Vec::new(),
        }
    }

    /// Creates a live instance bound to a validated config slice.
    fn create(&self, config: serde_json::Value) -> Result<Box<dyn ContextLifecycle>, PluginError>;
}

/// The live side of a context plugin.
#[async_trait]
pub trait ContextLifecycle: Send {
    /// Provisions resources and records them in the plugin's namespace.
    ///
    /// May leave the namespace in any intermediate shape on failure.
    async fn setup(&mut self, scope: ContextScope<'_>) -> Result<(), PluginError>;

    /// Best-effort teardown of everything setup may have created.
    async fn cleanup(&mut self, scope: ContextScope<'_>) -> Result<(), PluginError>;
}

/// A live plugin bound to one config slice.
pub struct ContextInstance {
    spec: ContextSpec,
    config: serde_json::Value,
    lifecycle: Box<dyn ContextLifecycle>,
}

impl ContextInstance {
    /// Creates a new instance.
    #[must_use]
    pub fn new(
        spec: ContextSpec,
        config: serde_json::Value,
        lifecycle: Box<dyn ContextLifecycle>,
    ) -> Self {
        Self {
            spec,
            config,
            lifecycle,
        }
    }

    /// Instantiates a registered plugin with its config slice.
    pub fn from_plugin(
        plugin: &dyn ContextPlugin,
        config: serde_json::Value,
    ) -> Result<Self, PluginError> {
        let lifecycle = plugin.create(config.clone())?;
        Ok(Self::new(plugin.spec().clone(), config, lifecycle))
    }

    /// Returns the plugin metadata.
    #[must_use]
    pub fn spec(&self) -> &ContextSpec {
        &self.spec
    }

    /// Returns the plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Returns the declared order.
    #[must_use]
    pub fn order(&self) -> i32 {
        self.spec.order
    }

    /// Returns the config slice.
    #[must_use]
    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    /// Runs setup against the run context.
    pub async fn setup(&mut self, ctx: &mut RunContext) -> Result<(), PluginError> {
        self.lifecycle.setup(ContextScope::new(ctx, &self.spec)).await
    }

    /// Runs cleanup against the run context.
    pub async fn cleanup(&mut self, ctx: &mut RunContext) -> Result<(), PluginError> {
        self.lifecycle.cleanup(ContextScope::new(ctx, &self.spec)).await
    }
}

impl fmt::Debug for ContextInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextInstance")
            .field("name", &self.spec.name)
            .field("order", &self.spec.order)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ContextInstance {
    fn eq(&self, other: &Self) -> bool {
        self.spec.sort_key() == other.spec.sort_key()
    }
}

impl Eq for ContextInstance {}

impl PartialOrd for ContextInstance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ContextInstance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.spec.sort_key().cmp(&other.spec.sort_key())
    }
}
