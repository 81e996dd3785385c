//! Run identity for scoping resource ownership.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The kind of logical run a context manager is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// A benchmark task.
    Task,
    /// A verification run driven by a verifier.
    Verification,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task => write!(f, "Task"),
            Self::Verification => write!(f, "Verification"),
        }
    }
}

/// Identifies one run. The uuid is the owner id of every resource the
/// run creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunIdentity {
    /// The kind of run.
    pub kind: RunKind,
    /// The task or verifier uuid.
    pub uuid: Uuid,
}

impl RunIdentity {
    /// Creates a task identity.
    #[must_use]
    pub fn task(uuid: Uuid) -> Self {
        Self {
            kind: RunKind::Task,
            uuid,
        }
    }

    /// Creates a verification identity.
    #[must_use]
    pub fn verification(uuid: Uuid) -> Self {
        Self {
            kind: RunKind::Verification,
            uuid,
        }
    }

    /// Creates a task identity with a fresh uuid.
    #[must_use]
    pub fn new_task() -> Self {
        Self::task(Uuid::new_v4())
    }

    /// The owner id used to tag and later enumerate resources.
    #[must_use]
    pub fn owner_id(&self) -> String {
        self.uuid.to_string()
    }

    /// Prefix for every log line of this run.
    #[must_use]
    pub fn log_prefix(&self) -> String {
        format!("{} {} |", self.kind, self.uuid)
    }
}

impl Default for RunIdentity {
    fn default() -> Self {
        Self::new_task()
    }
}
