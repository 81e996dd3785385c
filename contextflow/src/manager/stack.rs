//! Ordered setup and reverse-order cleanup of resolved plugin instances.

use super::ManagerConfig;
use crate::cancellation::CancellationToken;
use crate::context::RunContext;
use crate::errors::{CleanupFailure, PluginError, SetupCause, SetupFailure};
use crate::events::{types, EventSink, NoOpEventSink};
use crate::observability::SpanTimer;
use crate::plugin::ContextInstance;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Renders a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// The instances of one run, sorted by `(order, name)`.
///
/// Only instances whose setup completed are ever cleaned up, and always in
/// the reverse of the order their setups completed.
pub struct ContextStack {
    instances: Vec<ContextInstance>,
    set_up: usize,
    setup_order: Vec<String>,
    cleanup_order: Vec<String>,
    config: ManagerConfig,
    sink: Arc<dyn EventSink>,
}

impl ContextStack {
    /// Creates a stack, sorting the instances.
    #[must_use]
    pub fn new(
        mut instances: Vec<ContextInstance>,
        config: ManagerConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        instances.sort();
        Self {
            instances,
            set_up: 0,
            setup_order: Vec::new(),
            cleanup_order: Vec::new(),
            config,
            sink,
        }
    }

    /// Plugin names in setup order.
    #[must_use]
    pub fn plugin_names(&self) -> Vec<&str> {
        self.instances.iter().map(ContextInstance::name).collect()
    }

    /// Number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns true if the stack holds no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Number of instances whose setup completed and are not cleaned up yet.
    #[must_use]
    pub fn set_up_count(&self) -> usize {
        self.set_up
    }

    /// Plugins whose setup completed, in completion order.
    #[must_use]
    pub fn setup_order(&self) -> &[String] {
        &self.setup_order
    }

    /// Plugins whose cleanup ran, in the order it ran.
    #[must_use]
    pub fn cleanup_order(&self) -> &[String] {
        &self.cleanup_order
    }

    /// Runs every pending setup in order.
    ///
    /// On the first failure the remaining setups are skipped and every
    /// instance set up so far is cleaned up in reverse. The failing
    /// instance itself is not cleaned up.
    ///
    /// # Errors
    ///
    /// Returns the wrapped failure of the first plugin that did not set up.
    pub async fn setup(
        &mut self,
        ctx: &mut RunContext,
        token: &CancellationToken,
    ) -> Result<(), SetupFailure> {
        let prefix = ctx.identity().log_prefix();
        let owner_id = ctx.owner_id();

        for idx in self.set_up..self.instances.len() {
            let position = idx + 1;
            let instance = &mut self.instances[idx];
            let name = instance.name().to_string();
            let order = instance.order();
            let timer = SpanTimer::start(format!("setup:{name}"));

            let result = if token.is_cancelled() {
                Err(SetupCause::Cancelled(token.reason().unwrap_or_default()))
            } else {
                info!(plugin = %name, order, position, owner_id = %owner_id, "{prefix} Setting up context '{name}'");
                self.sink.try_emit(
                    types::SETUP_STARTED,
                    Some(serde_json::json!({"plugin": name, "order": order, "position": position})),
                );
                run_setup(instance, ctx, self.config.setup_timeout()).await
            };

            match result {
                Ok(()) => {
                    self.set_up = position;
                    self.setup_order.push(name.clone());
                    let duration_ms = timer.finish();
                    debug!(plugin = %name, position, duration_ms, "{prefix} Context '{name}' set up");
                    self.sink.try_emit(
                        types::SETUP_COMPLETED,
                        Some(serde_json::json!({
                            "plugin": name,
                            "position": position,
                            "duration_ms": duration_ms,
                        })),
                    );
                }
                Err(cause) => {
                    let config = instance.config().clone();
                    error!(
                        plugin = %name,
                        order,
                        position,
                        error = %cause,
                        "{prefix} Setup of context '{name}' failed; rolling back {} context(s)",
                        self.set_up
                    );
                    self.sink.try_emit(
                        types::SETUP_FAILED,
                        Some(serde_json::json!({
                            "plugin": name,
                            "position": position,
                            "error": cause.to_string(),
                        })),
                    );

                    let rollback_failures = self.cleanup(ctx).await;
                    return Err(SetupFailure {
                        plugin: name,
                        position,
                        order,
                        config,
                        cause,
                        rollback_failures,
                    });
                }
            }
        }

        Ok(())
    }

    /// Cleans up every set-up instance in reverse order.
    ///
    /// Each cleanup gets the configured deadline. Failures, panics and
    /// overruns are collected and never stop the remaining cleanups.
    pub async fn cleanup(&mut self, ctx: &mut RunContext) -> Vec<CleanupFailure> {
        let prefix = ctx.identity().log_prefix();
        let deadline = self.config.cleanup_timeout();
        let mut failures = Vec::new();

        for idx in (0..self.set_up).rev() {
            let position = idx + 1;
            let instance = &mut self.instances[idx];
            let name = instance.name().to_string();

            info!(plugin = %name, position, "{prefix} Cleaning up context '{name}'");
            self.sink.try_emit(
                types::CLEANUP_STARTED,
                Some(serde_json::json!({"plugin": name, "position": position})),
            );

            let timer = SpanTimer::start(format!("cleanup:{name}"));
            let outcome = tokio::time::timeout(
                deadline,
                AssertUnwindSafe(instance.cleanup(ctx)).catch_unwind(),
            )
            .await;

            let failure = match outcome {
                Ok(Ok(Ok(()))) => None,
                Ok(Ok(Err(err))) => Some(CleanupFailure::new(&name, position, err.to_string())),
                Ok(Err(panic)) => Some(CleanupFailure::new(
                    &name,
                    position,
                    format!("cleanup panicked: {}", panic_message(panic.as_ref())),
                )),
                Err(_) => Some(CleanupFailure::timed_out(&name, position, deadline)),
            };

            match failure {
                None => self.sink.try_emit(
                    types::CLEANUP_COMPLETED,
                    Some(serde_json::json!({
                        "plugin": name,
                        "position": position,
                        "duration_ms": timer.finish(),
                    })),
                ),
                Some(failure) => {
                    warn!(
                        plugin = %name,
                        position,
                        timed_out = failure.timed_out,
                        "{prefix} Cleanup of context '{name}' failed: {}",
                        failure.message
                    );
                    self.sink.try_emit(
                        types::CLEANUP_FAILED,
                        Some(serde_json::json!({
                            "plugin": name,
                            "position": position,
                            "error": failure.message,
                            "timed_out": failure.timed_out,
                        })),
                    );
                    failures.push(failure);
                }
            }

            self.cleanup_order.push(name);
        }

        self.set_up = 0;
        failures
    }
}

async fn run_setup(
    instance: &mut ContextInstance,
    ctx: &mut RunContext,
    deadline: Option<std::time::Duration>,
) -> Result<(), SetupCause> {
    let guarded = AssertUnwindSafe(instance.setup(ctx)).catch_unwind();
    let outcome = match deadline {
        Some(deadline) => match tokio::time::timeout(deadline, guarded).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(SetupCause::TimedOut(deadline)),
        },
        None => guarded.await,
    };

    match outcome {
        Ok(result) => result.map_err(SetupCause::Plugin),
        Err(panic) => Err(SetupCause::Plugin(PluginError::Other(anyhow::anyhow!(
            "setup panicked: {}",
            panic_message(panic.as_ref())
        )))),
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        Self::new(Vec::new(), ManagerConfig::default(), Arc::new(NoOpEventSink))
    }
}

impl Drop for ContextStack {
    fn drop(&mut self) {
        if self.set_up > 0 {
            warn!(
                pending = self.set_up,
                "Context stack dropped with contexts still set up; their resources may leak"
            );
        }
    }
}

impl std::fmt::Debug for ContextStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStack")
            .field("plugins", &self.plugin_names())
            .field("set_up", &self.set_up)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::testing::{Journal, RecordingContext};
    use pretty_assertions::assert_eq;

    fn stack(plugins: Vec<RecordingContext>, config: ManagerConfig) -> (ContextStack, Arc<CollectingEventSink>) {
        let sink = Arc::new(CollectingEventSink::new());
        let instances = plugins.into_iter().map(RecordingContext::into_instance).collect();
        (ContextStack::new(instances, config, sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_setup_then_reverse_cleanup() {
        let journal = Journal::new();
        let (mut stack, sink) = stack(
            vec![
                RecordingContext::new("c", 300, &journal),
                RecordingContext::new("a", 100, &journal),
                RecordingContext::new("b", 200, &journal),
            ],
            ManagerConfig::default(),
        );
        let mut ctx = RunContext::default();

        stack.setup(&mut ctx, &CancellationToken::new()).await.unwrap();
        assert_eq!(stack.set_up_count(), 3);
        let failures = stack.cleanup(&mut ctx).await;

        assert!(failures.is_empty());
        assert_eq!(
            journal.entries(),
            vec!["setup:a", "setup:b", "setup:c", "cleanup:c", "cleanup:b", "cleanup:a"]
        );
        assert_eq!(stack.setup_order(), ["a", "b", "c"]);
        assert_eq!(stack.cleanup_order(), ["c", "b", "a"]);
        assert_eq!(sink.events_of_type("context.setup.completed").len(), 3);
        assert_eq!(sink.events_of_type("context.cleanup.completed").len(), 3);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_earlier_plugins_only() {
        let journal = Journal::new();
        let (mut stack, _) = stack(
            vec![
                RecordingContext::new("a", 1, &journal),
                RecordingContext::new("b", 2, &journal),
                RecordingContext::new("c", 3, &journal).fail_setup("quota exceeded"),
                RecordingContext::new("d", 4, &journal),
            ],
            ManagerConfig::default(),
        );
        let mut ctx = RunContext::default();

        let failure = stack
            .setup(&mut ctx, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.plugin, "c");
        assert_eq!(failure.position, 3);
        assert!(failure.to_string().contains("quota exceeded"));
        assert_eq!(
            journal.entries(),
            vec!["setup:a", "setup:b", "setup:c", "cleanup:b", "cleanup:a"]
        );
        assert_eq!(stack.set_up_count(), 0);
    }

    #[tokio::test]
    async fn test_rollback_failures_are_attached() {
        let journal = Journal::new();
        let (mut stack, _) = stack(
            vec![
                RecordingContext::new("a", 1, &journal).fail_cleanup("container busy"),
                RecordingContext::new("b", 2, &journal).fail_setup("boom"),
            ],
            ManagerConfig::default(),
        );
        let mut ctx = RunContext::default();

        let failure = stack
            .setup(&mut ctx, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(failure.rollback_failures.len(), 1);
        assert_eq!(failure.rollback_failures[0].plugin, "a");
    }

    #[tokio::test]
    async fn test_stalled_cleanup_does_not_block_others() {
        let journal = Journal::new();
        let (mut stack, sink) = stack(
            vec![
                RecordingContext::new("a", 1, &journal),
                RecordingContext::new("b", 2, &journal).stall_cleanup(),
            ],
            ManagerConfig::default().with_cleanup_timeout(0.05),
        );
        let mut ctx = RunContext::default();

        stack.setup(&mut ctx, &CancellationToken::new()).await.unwrap();
        let failures = stack.cleanup(&mut ctx).await;

        assert_eq!(failures.len(), 1);
        assert!(failures[0].timed_out);
        assert_eq!(failures[0].plugin, "b");
        assert_eq!(stack.cleanup_order(), ["b", "a"]);
        assert!(journal.entries().contains(&"cleanup:a".to_string()));
        assert_eq!(sink.events_of_type("context.cleanup.failed").len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_cleanup_is_collected() {
        let journal = Journal::new();
        let (mut stack, _) = stack(
            vec![
                RecordingContext::new("a", 1, &journal),
                RecordingContext::new("b", 2, &journal).panic_cleanup(),
            ],
            ManagerConfig::default(),
        );
        let mut ctx = RunContext::default();

        stack.setup(&mut ctx, &CancellationToken::new()).await.unwrap();
        let failures = stack.cleanup(&mut ctx).await;

        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.contains("panicked"));
        assert_eq!(stack.cleanup_order(), ["b", "a"]);
    }

    #[tokio::test]
    async fn test_setup_deadline() {
        let journal = Journal::new();
        let (mut stack, _) = stack(
            vec![
                RecordingContext::new("a", 1, &journal),
                RecordingContext::new("b", 2, &journal).stall_setup(),
            ],
            ManagerConfig::default().with_setup_timeout(0.05),
        );
        let mut ctx = RunContext::default();

        let failure = stack
            .setup(&mut ctx, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(failure.cause, SetupCause::TimedOut(_)));
        assert_eq!(journal.entries(), vec!["setup:a", "setup:b", "cleanup:a"]);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_setup() {
        let journal = Journal::new();
        let (mut stack, _) = stack(
            vec![RecordingContext::new("a", 1, &journal)],
            ManagerConfig::default(),
        );
        let token = CancellationToken::new();
        token.cancel("shutdown");
        let mut ctx = RunContext::default();

        let failure = stack.setup(&mut ctx, &token).await.unwrap_err();
        assert!(matches!(failure.cause, SetupCause::Cancelled(ref r) if r == "shutdown"));
        assert!(journal.entries().is_empty());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
