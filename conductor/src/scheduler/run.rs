//! Per-invocation run state for a pipeline.

use crate::core::TaskStatus;
use crate::model::Pipeline;
use crate::operators::{ContextMap, JsonMap};
use crate::utils::{generate_uuid, now, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The status of a pipeline run.
///
/// Derived from task state, not independently stored: a run is running
/// while any task is non-terminal, failed when any task terminally failed,
/// cancelled on explicit stop, and successful otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted but not yet promoted into the active set.
    Queued,
    /// Actively scheduling tasks.
    Running,
    /// Every task terminal, none failed.
    Success,
    /// At least one task terminally failed.
    Failed,
    /// Explicitly stopped.
    Cancelled,
}

impl RunStatus {
    /// Returns true for states a run can never leave.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One execution instance of a pipeline definition.
///
/// The run owns a private copy of the pipeline; task status, timestamps,
/// retry counts, and error messages are mutated only by the scheduler as
/// executor results arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique run id.
    pub run_id: String,
    /// The pipeline being executed.
    pub pipeline: Pipeline,
    /// Who or what submitted the run.
    pub triggered_by: String,
    /// Run-level parameters, merged under pipeline defaults.
    pub parameters: JsonMap,
    /// Current run status.
    pub status: RunStatus,
    /// When the run was accepted.
    pub submitted_at: Timestamp,
    /// When the run was promoted into the active set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the run reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Output data of completed tasks, keyed by task id.
    #[serde(default)]
    pub task_outputs: ContextMap,
}

impl PipelineRun {
    /// Creates a queued run for the given pipeline.
    #[must_use]
    pub fn new(pipeline: Pipeline, triggered_by: impl Into<String>, parameters: JsonMap) -> Self {
        Self {
            run_id: generate_uuid(),
            pipeline,
            triggered_by: triggered_by.into(),
            parameters,
            status: RunStatus::Queued,
            submitted_at: now(),
            started_at: None,
            finished_at: None,
            task_outputs: ContextMap::new(),
        }
    }

    /// Current status of every task, keyed by id.
    #[must_use]
    pub fn task_statuses(&self) -> HashMap<String, TaskStatus> {
        self.pipeline
            .tasks
            .values()
            .map(|t| (t.id.clone(), t.status))
            .collect()
    }

    /// Share of tasks in a terminal state, in percent.
    #[must_use]
    pub fn progress(&self) -> f64 {
        let total = self.pipeline.len();
        if total == 0 {
            return 100.0;
        }
        let terminal = self
            .pipeline
            .tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .count();
        terminal as f64 / total as f64 * 100.0
    }

    /// True exactly when every task is terminal.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pipeline.tasks.values().all(|t| t.status.is_terminal())
    }

    /// Status derived from task state.
    ///
    /// Failed tasks dominate cancelled ones; a run with any terminally
    /// failed task is failed even if later tasks were cancelled.
    #[must_use]
    pub fn derive_status(&self) -> RunStatus {
        if !self.is_complete() {
            return RunStatus::Running;
        }
        let statuses: Vec<TaskStatus> = self.pipeline.tasks.values().map(|t| t.status).collect();
        if statuses.contains(&TaskStatus::Failed) {
            RunStatus::Failed
        } else if statuses.contains(&TaskStatus::Cancelled) {
            RunStatus::Cancelled
        } else {
            RunStatus::Success
        }
    }

    /// Records a completed task's output as context for dependents.
    pub fn record_task_output(&mut self, task_id: &str, output: JsonMap) {
        self.task_outputs.insert(task_id.to_string(), output);
    }

    /// Ids of tasks eligible to start right now.
    #[must_use]
    pub fn runnable_task_ids(&self) -> Vec<String> {
        let statuses = self.task_statuses();
        self.pipeline
            .runnable_tasks(&statuses)
            .iter()
            .map(|t| t.id.clone())
            .collect()
    }

    /// Total run duration in seconds, when finished.
    #[must_use]
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }

    /// Moves the run into a terminal status and stamps the end time.
    pub fn finalize(&mut self, status: RunStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.finished_at = Some(now());
    }
}

/// Read-only snapshot of a run's state for status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusReport {
    /// The run id.
    pub run_id: String,
    /// The pipeline name.
    pub pipeline_name: String,
    /// Current run status.
    pub status: RunStatus,
    /// Share of terminal tasks, in percent.
    pub progress: f64,
    /// Per-task statuses.
    pub task_statuses: HashMap<String, TaskStatus>,
    /// Who or what submitted the run.
    pub triggered_by: String,
    /// When the run was accepted.
    pub submitted_at: Timestamp,
    /// When the run was promoted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the run finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
}

impl RunStatusReport {
    /// Builds a report from the current run state.
    #[must_use]
    pub fn from_run(run: &PipelineRun) -> Self {
        Self {
            run_id: run.run_id.clone(),
            pipeline_name: run.pipeline.name.clone(),
            status: run.status,
            progress: run.progress(),
            task_statuses: run.task_statuses(),
            triggered_by: run.triggered_by.clone(),
            submitted_at: run.submitted_at,
            started_at: run.started_at,
            finished_at: run.finished_at,
        }
    }
}
