//! Scheduler execution metrics.

use super::RunStatus;
use serde::{Deserialize, Serialize};

/// Counters and aggregates the scheduler maintains across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    /// Runs accepted by `submit`.
    pub runs_submitted: u64,
    /// Runs finalized as success.
    pub runs_succeeded: u64,
    /// Runs finalized as failed.
    pub runs_failed: u64,
    /// Runs cancelled by explicit stop.
    pub runs_cancelled: u64,
    /// Task execution attempts completed (including retries).
    pub tasks_executed: u64,
    /// Running average duration of finalized runs, in seconds.
    pub avg_run_duration_seconds: f64,
}

impl SchedulerMetrics {
    /// Records a finalized run.
    ///
    /// Cancelled runs count toward the average duration but are excluded
    /// from the failure counter.
    pub fn record_run_completion(&mut self, status: RunStatus, duration_seconds: f64) {
        match status {
            RunStatus::Success => self.runs_succeeded += 1,
            RunStatus::Failed => self.runs_failed += 1,
            RunStatus::Cancelled => self.runs_cancelled += 1,
            RunStatus::Queued | RunStatus::Running => return,
        }

        let completed = self.runs_succeeded + self.runs_failed + self.runs_cancelled;
        self.avg_run_duration_seconds += (duration_seconds - self.avg_run_duration_seconds)
            / completed as f64;
    }
}
