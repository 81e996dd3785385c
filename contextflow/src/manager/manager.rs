//! The context manager: validate, set up, run the action, clean up.

use super::stack::panic_message;
use super::{ActionOutcome, ContextStack, ManagerConfig, RunReport};
use crate::cancellation::CancellationToken;
use crate::context::{ContextConfig, RunContext};
use crate::errors::{ContextError, InvalidConfigError, ValidationError};
use crate::events::{get_event_sink, types, EventSink};
use crate::plugin::{ContextInstance, ContextPlugin};
use crate::registry::ContextRegistry;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Drives the context lifecycle of runs on one platform.
pub struct ContextManager {
    registry: Arc<ContextRegistry>,
    platform: String,
    allow_hidden: bool,
    config: ManagerConfig,
    sink: Arc<dyn EventSink>,
}

impl ContextManager {
    /// Creates a manager for benchmark tasks. Hidden plugins are never resolved.
    #[must_use]
    pub fn for_task(registry: Arc<ContextRegistry>, platform: impl Into<String>) -> Self {
        Self::new(registry, platform.into(), false)
    }

    /// Creates a manager for verification runs, which may resolve hidden plugins.
    #[must_use]
    pub fn for_verification(registry: Arc<ContextRegistry>, platform: impl Into<String>) -> Self {
        Self::new(registry, platform.into(), true)
    }

    fn new(registry: Arc<ContextRegistry>, platform: String, allow_hidden: bool) -> Self {
        Self {
            registry,
            platform,
            allow_hidden,
            config: ManagerConfig::default(),
            sink: get_event_sink(),
        }
    }

    /// Sets the deadlines.
    #[must_use]
    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The platform plugins are resolved for.
    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Whether hidden plugins are resolvable.
    #[must_use]
    pub fn allows_hidden(&self) -> bool {
        self.allow_hidden
    }

    /// The deadlines in use.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn resolve_all<'c>(
        &self,
        config: &'c ContextConfig,
    ) -> Result<Vec<(Arc<dyn ContextPlugin>, &'c serde_json::Value)>, ContextError> {
        config
            .iter()
            .map(|(name, value)| {
                self.registry
                    .resolve(name, &self.platform, self.allow_hidden)
                    .map(|plugin| (plugin, value))
            })
            .collect()
    }

    /// Validates a context configuration.
    ///
    /// Every plugin is validated and every violation is reported.
    ///
    /// # Errors
    ///
    /// Returns `PluginNotFound` for the first unknown plugin name, or
    /// `InvalidConfig` carrying all violations.
    pub fn validate(&self, config: &ContextConfig) -> Result<(), ContextError> {
        let resolved = self.resolve_all(config)?;
        let violations: Vec<ValidationError> = resolved
            .iter()
            .flat_map(|(plugin, value)| plugin.validate(value))
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(InvalidConfigError::new(violations).into())
        }
    }

    /// Resolves, validates and instantiates every configured plugin.
    ///
    /// # Errors
    ///
    /// Returns resolution and validation errors; a plugin refusing to
    /// instantiate is reported as an invalid config.
    pub fn prepare(&self, config: &ContextConfig) -> Result<ContextStack, ContextError> {
        self.validate(config)?;

        let mut instances = Vec::with_capacity(config.len());
        let mut violations = Vec::new();
        for (plugin, value) in self.resolve_all(config)? {
            match ContextInstance::from_plugin(plugin.as_ref(), value.clone()) {
                Ok(instance) => instances.push(instance),
                Err(err) => violations.push(ValidationError::new(
                    &plugin.spec().name,
                    "",
                    err.to_string(),
                )),
            }
        }
        if !violations.is_empty() {
            return Err(InvalidConfigError::new(violations).into());
        }

        Ok(ContextStack::new(instances, self.config.clone(), Arc::clone(&self.sink)))
    }

    /// Sets up every configured plugin, runs `action` once, then cleans up.
    ///
    /// Dropping the returned future before it completes still cleans up
    /// every context that finished its setup, on a background task of the
    /// current runtime. That cleanup works on a copy of `ctx`, so prefer a
    /// [`CancellationToken`] or [`ManagerConfig::action_timeout`] when the
    /// caller needs the cleaned-up context or the report.
    ///
    /// # Errors
    ///
    /// Returns an error only if the run never reached the action.
    pub async fn run<T, F>(
        &self,
        config: &ContextConfig,
        ctx: &mut RunContext,
        action: F,
    ) -> Result<RunReport<T>, ContextError>
    where
        F: for<'c> FnOnce(&'c mut RunContext) -> BoxFuture<'c, anyhow::Result<T>>,
    {
        self.run_with_cancellation(config, ctx, &CancellationToken::new(), action)
            .await
    }

    /// Like [`ContextManager::run`], observing a cancellation token.
    ///
    /// Cancellation during setup stops further setups and rolls back.
    /// Cancellation during the action interrupts it; cleanup still runs.
    ///
    /// # Errors
    ///
    /// Returns resolution, validation and setup errors, or `Cancelled` if
    /// the token was cancelled before the first setup.
    pub async fn run_with_cancellation<T, F>(
        &self,
        config: &ContextConfig,
        ctx: &mut RunContext,
        token: &CancellationToken,
        action: F,
    ) -> Result<RunReport<T>, ContextError>
    where
        F: for<'c> FnOnce(&'c mut RunContext) -> BoxFuture<'c, anyhow::Result<T>>,
    {
        let started_at = Utc::now();
        let prefix = ctx.identity().log_prefix();

        let stack = self.prepare(config)?;
        if token.is_cancelled() {
            return Err(ContextError::Cancelled(token.reason().unwrap_or_default()));
        }
        ctx.set_config(config.clone());

        info!(
            platform = %self.platform,
            contexts = ?stack.plugin_names(),
            "{prefix} Setting up {} context(s)",
            stack.len()
        );
        let mut guard = TeardownGuard {
            ctx,
            stack,
            prefix: prefix.clone(),
        };
        let TeardownGuard { ctx, stack, .. } = &mut guard;
        let ctx: &mut RunContext = ctx;
        stack.setup(ctx, token).await?;

        self.sink.try_emit(types::ACTION_STARTED, None);
        let outcome = self.run_action(ctx, token, action).await;
        self.log_outcome(&prefix, &outcome);

        let cleanup_failures = stack.cleanup(ctx).await;
        let report = RunReport {
            owner_id: ctx.owner_id(),
            action: outcome,
            setup_order: stack.setup_order().to_vec(),
            cleanup_order: stack.cleanup_order().to_vec(),
            cleanup_failures,
            started_at,
            finished_at: Utc::now(),
        };

        if let Some(summary) = report.warning_summary() {
            warn!("{prefix} {summary}");
        }
        Ok(report)
    }

    async fn run_action<T, F>(
        &self,
        ctx: &mut RunContext,
        token: &CancellationToken,
        action: F,
    ) -> ActionOutcome<T>
    where
        F: for<'c> FnOnce(&'c mut RunContext) -> BoxFuture<'c, anyhow::Result<T>>,
    {
        let deadline = self.config.action_timeout();
        let guarded = async move {
            let action = AssertUnwindSafe(action(ctx)).catch_unwind();
            let result = match deadline {
                Some(deadline) => match tokio::time::timeout(deadline, action).await {
                    Ok(result) => result,
                    Err(_) => return ActionOutcome::TimedOut(deadline),
                },
                None => action.await,
            };
            match result {
                Ok(Ok(value)) => ActionOutcome::Completed(value),
                Ok(Err(err)) => ActionOutcome::Failed(err),
                Err(panic) => ActionOutcome::Failed(anyhow::anyhow!(
                    "action panicked: {}",
                    panic_message(panic.as_ref())
                )),
            }
        };

        tokio::select! {
            outcome = guarded => outcome,
            () = token.cancelled() => ActionOutcome::Cancelled(token.reason().unwrap_or_default()),
        }
    }

    fn log_outcome<T>(&self, prefix: &str, outcome: &ActionOutcome<T>) {
        match outcome {
            ActionOutcome::Completed(_) => {
                info!("{prefix} Action completed");
                self.sink.try_emit(types::ACTION_COMPLETED, None);
            }
            ActionOutcome::Failed(err) => {
                error!(error = %err, "{prefix} Action failed: {err:#}");
                self.sink.try_emit(
                    types::ACTION_FAILED,
                    Some(serde_json::json!({"error": format!("{err:#}")})),
                );
            }
            ActionOutcome::TimedOut(deadline) => {
                error!("{prefix} Action timed out after {deadline:?}");
                self.sink.try_emit(
                    types::ACTION_FAILED,
                    Some(serde_json::json!({"timed_out": true})),
                );
            }
            ActionOutcome::Cancelled(reason) => {
                warn!("{prefix} Action cancelled: {reason}");
                self.sink.try_emit(
                    types::ACTION_CANCELLED,
                    Some(serde_json::json!({"reason": reason})),
                );
            }
        }
    }
}

/// Finishes cleanup when a run is dropped between setup and cleanup.
struct TeardownGuard<'a> {
    ctx: &'a mut RunContext,
    stack: ContextStack,
    prefix: String,
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        let pending = self.stack.set_up_count();
        if pending == 0 {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        warn!(
            pending,
            "{} Run dropped with {pending} context(s) set up; cleaning up in the background",
            self.prefix
        );
        let mut stack = std::mem::take(&mut self.stack);
        let mut ctx = self.ctx.clone();
        let prefix = self.prefix.clone();
        runtime.spawn(async move {
            let failures = stack.cleanup(&mut ctx).await;
            if !failures.is_empty() {
                warn!(
                    failed = failures.len(),
                    "{prefix} Background cleanup of a dropped run finished with failures"
                );
            }
        });
    }
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("platform", &self.platform)
            .field("allow_hidden", &self.allow_hidden)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
