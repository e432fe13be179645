//! Scheduler configuration.

use std::time::Duration;

/// Configuration for the scheduler and its resource pool.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Total CPU cores in the pool.
    pub total_cpu_cores: f64,
    /// Total memory in gigabytes.
    pub total_memory_gb: f64,
    /// Total GPUs.
    pub total_gpu_count: u32,
    /// Ceiling on concurrently active runs.
    pub max_concurrent_runs: usize,
    /// Scheduling loop tick interval.
    pub tick_interval: Duration,
    /// Heartbeat logging interval.
    pub heartbeat_interval: Duration,
    /// Host usage sampling interval.
    pub monitor_interval: Duration,
    /// Allocation age beyond which a task is flagged as stuck.
    pub stuck_allocation_ceiling: Duration,
    /// Number of completed runs retained for status queries.
    pub completed_run_retention: usize,
    /// Rejects at submission any task whose requirements exceed total pool
    /// capacity. Off by default: such tasks stay pending while independent
    /// tasks in the same run still proceed.
    pub validate_capacity_at_submission: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            total_cpu_cores: 4.0,
            total_memory_gb: 16.0,
            total_gpu_count: 1,
            max_concurrent_runs: 5,
            tick_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            monitor_interval: Duration::from_secs(60),
            stuck_allocation_ceiling: Duration::from_secs(6 * 3600),
            completed_run_retention: 1000,
            validate_capacity_at_submission: false,
        }
    }
}

impl SchedulerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pool totals.
    #[must_use]
    pub fn with_capacity(mut self, cpu_cores: f64, memory_gb: f64, gpu_count: u32) -> Self {
        self.total_cpu_cores = cpu_cores;
        self.total_memory_gb = memory_gb;
        self.total_gpu_count = gpu_count;
        self
    }

    /// Sets the concurrent-run ceiling.
    #[must_use]
    pub fn with_max_concurrent_runs(mut self, max: usize) -> Self {
        self.max_concurrent_runs = max;
        self
    }

    /// Sets the scheduling tick interval.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the completed-run retention cap.
    #[must_use]
    pub fn with_completed_run_retention(mut self, retention: usize) -> Self {
        self.completed_run_retention = retention;
        self
    }

    /// Enables submission-time validation against total pool capacity.
    #[must_use]
    pub fn with_capacity_validation(mut self) -> Self {
        self.validate_capacity_at_submission = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrent_runs, 5);
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.completed_run_retention, 1000);
        assert!(!config.validate_capacity_at_submission);
    }

    #[test]
    fn test_builders() {
        let config = SchedulerConfig::new()
            .with_capacity(8.0, 32.0, 2)
            .with_max_concurrent_runs(2)
            .with_capacity_validation();
        assert_eq!(config.total_cpu_cores, 8.0);
        assert_eq!(config.total_gpu_count, 2);
        assert_eq!(config.max_concurrent_runs, 2);
        assert!(config.validate_capacity_at_submission);
    }
}
