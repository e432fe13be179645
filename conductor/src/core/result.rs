//! Task result type with factory methods.

use crate::utils::{generate_uuid, now, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The outcome of a single task execution attempt.
///
/// `TaskResult` is immutable once created; the scheduler consumes it to
/// update run state, and its `output_data` becomes context for downstream
/// tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// The id of the executed task.
    pub task_id: String,

    /// Whether the attempt succeeded.
    pub success: bool,

    /// Output data consumed as downstream context.
    #[serde(default)]
    pub output_data: HashMap<String, serde_json::Value>,

    /// Error message for failed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Paths of artifacts produced by the task.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,

    /// Unique id of this execution attempt.
    pub execution_id: String,

    /// When the attempt finished.
    pub executed_at: Timestamp,
}

impl TaskResult {
    /// Creates a successful result with output data.
    #[must_use]
    pub fn ok(task_id: impl Into<String>, output_data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            output_data,
            error_message: None,
            artifacts: Vec::new(),
            execution_id: generate_uuid(),
            executed_at: now(),
        }
    }

    /// Creates a successful result with no output data.
    #[must_use]
    pub fn ok_empty(task_id: impl Into<String>) -> Self {
        Self::ok(task_id, HashMap::new())
    }

    /// Creates a failed result with an error message.
    #[must_use]
    pub fn fail(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            output_data: HashMap::new(),
            error_message: Some(error.into()),
            artifacts: Vec::new(),
            execution_id: generate_uuid(),
            executed_at: now(),
        }
    }

    /// Adds an artifact path.
    #[must_use]
    pub fn with_artifact(mut self, path: impl Into<String>) -> Self {
        self.artifacts.push(path.into());
        self
    }

    /// Adds a single output value.
    #[must_use]
    pub fn with_output(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.output_data.insert(key.into(), value);
        self
    }
}
