//! Task status enum and state-machine queries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a task.
///
/// Transitions are scheduler-driven only:
/// `Pending -> Queued -> Running -> {Success, Failed, Cancelled}`, with
/// `Failed -> Retry -> Pending` while retries remain. `Skipped` marks tasks
/// whose upstream terminally failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is waiting for its dependencies or for admission.
    Pending,
    /// Task is queued for execution.
    Queued,
    /// Task is currently executing.
    Running,
    /// Task completed successfully.
    Success,
    /// Task failed terminally (retries exhausted).
    Failed,
    /// Task failed and is waiting out its retry backoff.
    Retry,
    /// Task was cancelled.
    Cancelled,
    /// Task was skipped because an upstream task failed.
    Skipped,
}

impl TaskStatus {
    /// Returns true for states the task can never leave.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Cancelled | Self::Skipped
        )
    }

    /// Returns true for states that satisfy a downstream dependency.
    #[must_use]
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Retry => write!(f, "retry"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}
