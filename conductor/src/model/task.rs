//! Task, resource requirement, and retry policy types.

use crate::core::TaskStatus;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Compute capacity a task reserves while running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// CPU cores.
    pub cpu_cores: f64,
    /// Memory in gigabytes.
    pub memory_gb: f64,
    /// Number of GPUs.
    pub gpu_count: u32,
    /// Disk in gigabytes. Tracked on allocations but not admission-gated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_gb: Option<f64>,
    /// Wall-clock execution ceiling, enforced uniformly on every task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            cpu_cores: 1.0,
            memory_gb: 1.0,
            gpu_count: 0,
            disk_gb: None,
            timeout_seconds: None,
        }
    }
}

impl ResourceRequirements {
    /// Creates requirements with the given cpu/memory/gpu amounts.
    #[must_use]
    pub fn new(cpu_cores: f64, memory_gb: f64, gpu_count: u32) -> Self {
        Self {
            cpu_cores,
            memory_gb,
            gpu_count,
            disk_gb: None,
            timeout_seconds: None,
        }
    }

    /// Sets the disk requirement.
    #[must_use]
    pub fn with_disk_gb(mut self, disk_gb: f64) -> Self {
        self.disk_gb = Some(disk_gb);
        self
    }

    /// Sets the execution timeout.
    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }
}

/// Bounded retry behavior for failed task attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay between attempts, in seconds.
    pub retry_delay_seconds: f64,
    /// Doubles the delay per attempt when enabled.
    pub exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_seconds: 60.0,
            exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with no retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            retry_delay_seconds: 0.0,
            exponential_backoff: false,
        }
    }

    /// Creates a policy with the given bound and base delay.
    #[must_use]
    pub fn new(max_retries: u32, retry_delay_seconds: f64, exponential_backoff: bool) -> Self {
        Self {
            max_retries,
            retry_delay_seconds,
            exponential_backoff,
        }
    }

    /// Returns true while the task has retries remaining.
    #[must_use]
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Delay before the given retry attempt (1-based).
    ///
    /// With exponential backoff the delay before attempt `k` is
    /// `retry_delay_seconds * 2^(k-1)`; otherwise it is constant.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.retry_delay_seconds.max(0.0);
        let seconds = if self.exponential_backoff && attempt > 1 {
            base * 2f64.powi(i32::try_from(attempt - 1).unwrap_or(i32::MAX))
        } else {
            base
        };
        Duration::from_secs_f64(seconds)
    }
}

/// One unit of work in a pipeline.
///
/// Everything except `status`, timestamps, `retry_count`, and
/// `error_message` is immutable after submission; those fields are mutated
/// only by the scheduler as executor results arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id within the pipeline.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Key of the operator that executes this task.
    pub operator: String,
    /// Task-level parameters, overriding pipeline-level defaults.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Ids of tasks that must reach a terminal success/skipped state first.
    #[serde(default)]
    pub upstream_tasks: HashSet<String>,
    /// Compute capacity reserved while the task runs.
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Retry behavior on failure.
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Environment variables passed to script-backed tasks.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: TaskStatus,
    /// When the current attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the task reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Number of retries consumed so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Error message from the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Task {
    /// Creates a new pending task.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            operator: operator.into(),
            parameters: HashMap::new(),
            upstream_tasks: HashSet::new(),
            resources: ResourceRequirements::default(),
            retry_policy: RetryPolicy::default(),
            env: HashMap::new(),
            status: TaskStatus::Pending,
            started_at: None,
            finished_at: None,
            retry_count: 0,
            error_message: None,
        }
    }

    /// Adds a single parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Merges a parameter map.
    #[must_use]
    pub fn with_parameters(mut self, params: HashMap<String, serde_json::Value>) -> Self {
        self.parameters.extend(params);
        self
    }

    /// Adds an upstream dependency.
    #[must_use]
    pub fn with_upstream(mut self, upstream: impl Into<String>) -> Self {
        self.upstream_tasks.insert(upstream.into());
        self
    }

    /// Sets the resource requirements.
    #[must_use]
    pub fn with_resources(mut self, resources: ResourceRequirements) -> Self {
        self.resources = resources;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Duration of the last attempt in seconds, when both timestamps exist.
    #[must_use]
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }

    /// Marks the task as running and stamps the start time.
    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(crate::utils::now());
    }

    /// Moves the task into a terminal state and stamps the end time.
    pub fn mark_terminal(&mut self, status: TaskStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.finished_at = Some(crate::utils::now());
        self.error_message = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_bound() {
        let policy = RetryPolicy::new(2, 1.0, false);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let policy = RetryPolicy::new(3, 1.0, true);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn test_constant_backoff_delays() {
        let policy = RetryPolicy::new(3, 5.0, false);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn test_task_builder() {
        let task = Task::new("t1", "Train", "model_training")
            .with_parameter("model_type", serde_json::json!("xgboost"))
            .with_upstream("ingest")
            .with_resources(ResourceRequirements::new(2.0, 4.0, 1))
            .with_env("STAGE", "test");

        assert_eq!(task.id, "t1");
        assert_eq!(task.operator, "model_training");
        assert!(task.upstream_tasks.contains("ingest"));
        assert_eq!(task.resources.gpu_count, 1);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.env.get("STAGE").map(String::as_str), Some("test"));
    }

    #[test]
    fn test_duration_requires_both_timestamps() {
        let mut task = Task::new("t", "t", "noop");
        assert!(task.duration_seconds().is_none());
        task.mark_running();
        assert!(task.duration_seconds().is_none());
        task.mark_terminal(TaskStatus::Success, None);
        assert!(task.duration_seconds().is_some());
    }
}
