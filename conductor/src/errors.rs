//! Error types for the conductor engine.
//!
//! The taxonomy separates errors rejected at submission (DAG validation),
//! configuration errors surfaced as immediate task failure (unknown
//! operator), execution errors contained at the task boundary, and
//! resource-accounting errors from the admission-control layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for conductor operations.
#[derive(Debug, Error)]
pub enum ConductorError {
    /// A pipeline failed DAG validation and was never scheduled.
    #[error("{0}")]
    Validation(#[from] DagValidationErrors),

    /// A task references an unregistered operator or carries invalid
    /// operator parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operator failed, or a subprocess exited non-zero or timed out.
    #[error("Execution error: {0}")]
    Execution(String),

    /// A run or task was cancelled by an explicit stop request.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A task's resource requirements can never be satisfied by the pool.
    #[error("Capacity error: {0}")]
    Capacity(String),

    /// A resource accounting error.
    #[error("{0}")]
    Resource(#[from] ResourceError),

    /// The referenced run id is unknown to the scheduler.
    #[error("Unknown run: {0}")]
    UnknownRun(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single DAG validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DagValidationError {
    /// A task references an upstream id that does not exist in the pipeline.
    #[error("Task '{task}' references unknown upstream task '{upstream}'")]
    UnknownUpstream {
        /// The task declaring the dependency.
        task: String,
        /// The missing upstream id.
        upstream: String,
    },

    /// A task depends on itself.
    #[error("Task '{task}' cannot depend on itself")]
    SelfDependency {
        /// The offending task.
        task: String,
    },

    /// Two tasks share the same id.
    #[error("Duplicate task id '{task}'")]
    DuplicateTaskId {
        /// The duplicated id.
        task: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Cycle detected in pipeline: {}", path.join(" -> "))]
    CycleDetected {
        /// The task ids forming the cycle, first repeated at the end.
        path: Vec<String>,
    },

    /// The pipeline has no tasks.
    #[error("Pipeline has no tasks")]
    EmptyPipeline,
}

/// The full set of validation errors for a rejected pipeline.
///
/// An empty list means the pipeline is valid; this type is only constructed
/// for non-empty lists.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Pipeline validation failed: {}", self.joined())]
pub struct DagValidationErrors {
    /// The individual validation failures.
    pub errors: Vec<DagValidationError>,
}

impl DagValidationErrors {
    /// Wraps a non-empty list of validation errors.
    #[must_use]
    pub fn new(errors: Vec<DagValidationError>) -> Self {
        Self { errors }
    }

    fn joined(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Errors from the resource admission-control layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceError {
    /// The task already holds a live allocation.
    #[error("Task '{task_id}' already holds a resource allocation")]
    AlreadyAllocated {
        /// The task id.
        task_id: String,
    },

    /// Current free capacity cannot satisfy the requirement.
    #[error("Insufficient {resource} for task '{task_id}': requested {requested}, available {available}")]
    Insufficient {
        /// The task id.
        task_id: String,
        /// The constrained resource (cpu, memory, gpu).
        resource: String,
        /// The requested amount.
        requested: f64,
        /// The currently available amount.
        available: f64,
    },
}
