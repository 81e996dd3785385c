//! Lifecycle event emission.
//!
//! Context managers report every setup, cleanup and action transition to
//! an [`EventSink`]. Managers without an explicit sink use the global one.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use parking_lot::RwLock;
use std::sync::Arc;

/// Event type names.
pub mod types {
    /// A plugin setup is starting.
    pub const SETUP_STARTED: &str = "context.setup.started";
    /// A plugin setup completed.
    pub const SETUP_COMPLETED: &str = "context.setup.completed";
    /// A plugin setup failed.
    pub const SETUP_FAILED: &str = "context.setup.failed";
    /// A plugin cleanup is starting.
    pub const CLEANUP_STARTED: &str = "context.cleanup.started";
    /// A plugin cleanup completed.
    pub const CLEANUP_COMPLETED: &str = "context.cleanup.completed";
    /// A plugin cleanup failed or timed out.
    pub const CLEANUP_FAILED: &str = "context.cleanup.failed";
    /// The benchmarked action is starting.
    pub const ACTION_STARTED: &str = "run.action.started";
    /// The action returned successfully.
    pub const ACTION_COMPLETED: &str = "run.action.completed";
    /// The action failed or timed out.
    pub const ACTION_FAILED: &str = "run.action.failed";
    /// The action was cancelled.
    pub const ACTION_CANCELLED: &str = "run.action.cancelled";
}

static GLOBAL_EVENT_SINK: RwLock<Option<Arc<dyn EventSink>>> = RwLock::new(None);

/// Sets the process-global event sink.
pub fn set_event_sink(sink: Arc<dyn EventSink>) {
    *GLOBAL_EVENT_SINK.write() = Some(sink);
}

/// Clears the process-global event sink.
pub fn clear_event_sink() {
    *GLOBAL_EVENT_SINK.write() = None;
}

/// Gets the process-global event sink, or a `NoOpEventSink` if unset.
pub fn get_event_sink() -> Arc<dyn EventSink> {
    GLOBAL_EVENT_SINK
        .read()
        .clone()
        .unwrap_or_else(|| Arc::new(NoOpEventSink))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get_sink() {
        let sink = Arc::new(CollectingEventSink::new());
        set_event_sink(sink.clone());

        get_event_sink().try_emit(types::SETUP_STARTED, None);
        assert_eq!(sink.len(), 1);

        clear_event_sink();
        get_event_sink().try_emit(types::SETUP_STARTED, None);
        assert_eq!(sink.len(), 1);
    }
}
