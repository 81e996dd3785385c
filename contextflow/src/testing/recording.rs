//! Recording plugins for lifecycle tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::context::ContextScope;
use crate::errors::PluginError;
use crate::plugin::{ContextInstance, ContextLifecycle, ContextPlugin, ContextSpec};

/// Shared, ordered log of lifecycle calls across plugins.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Returns all entries in recording order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Clears the journal.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[derive(Debug, Clone)]
enum Behavior {
    Succeed,
    Fail(String),
    Stall,
    Panic,
}

impl Behavior {
    async fn run(&self, plugin: &str, phase: &str) -> Result<(), PluginError> {
        match self {
            Self::Succeed => Ok(()),
            Self::Fail(message) => Err(PluginError::provisioning(message.clone())),
            Self::Stall => {
                futures::future::pending::<()>().await;
                Ok(())
            }
            Self::Panic => panic!("{plugin} {phase} panicked"),
        }
    }
}

/// A plugin that journals `setup:<name>` and `cleanup:<name>` calls.
///
/// Setup and cleanup can be told to fail, stall forever or panic, and
/// setup can write values into the plugin's namespace.
#[derive(Debug, Clone)]
pub struct RecordingContext {
    spec: ContextSpec,
    journal: Journal,
    setup: Behavior,
    cleanup: Behavior,
    writes: Vec<(String, serde_json::Value)>,
}

impl RecordingContext {
    /// Creates a succeeding plugin on the `test` platform.
    #[must_use]
    pub fn new(name: impl Into<String>, order: i32, journal: &Journal) -> Self {
        Self::with_spec(ContextSpec::new(name, "test", order), journal)
    }

    /// Creates a succeeding plugin with an explicit spec.
    #[must_use]
    pub fn with_spec(spec: ContextSpec, journal: &Journal) -> Self {
        Self {
            spec,
            journal: journal.clone(),
            setup: Behavior::Succeed,
            cleanup: Behavior::Succeed,
            writes: Vec::new(),
        }
    }

    /// Makes setup fail with a provisioning error.
    #[must_use]
    pub fn fail_setup(mut self, message: impl Into<String>) -> Self {
        self.setup = Behavior::Fail(message.into());
        self
    }

    /// Makes cleanup fail with a provisioning error.
    #[must_use]
    pub fn fail_cleanup(mut self, message: impl Into<String>) -> Self {
        self.cleanup = Behavior::Fail(message.into());
        self
    }

    /// Makes setup never complete.
    #[must_use]
    pub fn stall_setup(mut self) -> Self {
        self.setup = Behavior::Stall;
        self
    }

    /// Makes cleanup never complete.
    #[must_use]
    pub fn stall_cleanup(mut self) -> Self {
        self.cleanup = Behavior::Stall;
        self
    }

    /// Makes cleanup panic.
    #[must_use]
    pub fn panic_cleanup(mut self) -> Self {
        self.cleanup = Behavior::Panic;
        self
    }

    /// Writes `value` under `key` in the plugin namespace during setup.
    #[must_use]
    pub fn write_namespace(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.writes.push((key.into(), value));
        self
    }

    /// Wraps the plugin in a live instance with a null config.
    #[must_use]
    pub fn into_instance(self) -> ContextInstance {
        let spec = self.spec.clone();
        ContextInstance::new(spec, serde_json::Value::Null, Box::new(self))
    }
}

impl ContextPlugin for RecordingContext {
    fn spec(&self) -> &ContextSpec {
        &self.spec
    }

    fn create(&self, _config: serde_json::Value) -> Result<Box<dyn ContextLifecycle>, PluginError> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl ContextLifecycle for RecordingContext {
    async fn setup(&mut self, mut scope: ContextScope<'_>) -> Result<(), PluginError> {
        self.journal.record(format!("setup:{}", self.spec.name));
        if !self.writes.is_empty() {
            let namespace = scope.namespace_mut();
            for (key, value) in &self.writes {
                namespace[key.as_str()] = value.clone();
            }
        }
        self.setup.run(&self.spec.name, "setup").await
    }

    async fn cleanup(&mut self, mut scope: ContextScope<'_>) -> Result<(), PluginError> {
        self.journal.record(format!("cleanup:{}", self.spec.name));
        self.cleanup.run(&self.spec.name, "cleanup").await?;
        scope.remove_namespace();
        Ok(())
    }
}
