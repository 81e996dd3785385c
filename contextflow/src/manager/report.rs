//! Outcome of one managed run.

use crate::errors::CleanupFailure;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// What happened to the action.
#[derive(Debug)]
pub enum ActionOutcome<T> {
    /// The action returned a value.
    Completed(T),
    /// The action returned an error or panicked.
    Failed(anyhow::Error),
    /// The run was cancelled while the action was running.
    Cancelled(String),
    /// The action exceeded its deadline.
    TimedOut(Duration),
}

impl<T> ActionOutcome<T> {
    /// Returns true for `Completed`.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Short label used in logs and events.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled(_) => "cancelled",
            Self::TimedOut(_) => "timed_out",
        }
    }

    /// Converts into a `Result`, mapping every non-completed outcome to an error.
    pub fn into_result(self) -> anyhow::Result<T> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Failed(err) => Err(err),
            Self::Cancelled(reason) => Err(anyhow::anyhow!("action cancelled: {reason}")),
            Self::TimedOut(deadline) => {
                Err(anyhow::anyhow!("action timed out after {deadline:?}"))
            }
        }
    }
}

/// Report of a run whose setups all succeeded.
///
/// The action outcome and the cleanup warnings are independent: a clean
/// teardown never turns a failed action into a success, and a failed
/// teardown never turns a successful action into a failure.
#[derive(Debug)]
pub struct RunReport<T> {
    /// Owner id of the run.
    pub owner_id: String,
    /// The action outcome.
    pub action: ActionOutcome<T>,
    /// Plugins in the order their setup completed.
    pub setup_order: Vec<String>,
    /// Plugins in the order their cleanup ran.
    pub cleanup_order: Vec<String>,
    /// Cleanup failures, reported as warnings.
    pub cleanup_failures: Vec<CleanupFailure>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the last cleanup finished.
    pub finished_at: DateTime<Utc>,
}

impl<T> RunReport<T> {
    /// Returns true if the action completed. Cleanup warnings are ignored.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.action.is_completed()
    }

    /// Returns true if any cleanup failed.
    #[must_use]
    pub fn has_cleanup_warnings(&self) -> bool {
        !self.cleanup_failures.is_empty()
    }

    /// One-line summary of every cleanup failure, if any.
    #[must_use]
    pub fn warning_summary(&self) -> Option<String> {
        if self.cleanup_failures.is_empty() {
            return None;
        }
        let rendered: Vec<String> = self.cleanup_failures.iter().map(ToString::to_string).collect();
        Some(format!(
            "{} context cleanup(s) failed: {}",
            rendered.len(),
            rendered.join("; ")
        ))
    }

    /// Wall-clock duration of the run.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
