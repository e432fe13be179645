//! Resource pool: the single source of truth for compute capacity.
//!
//! Every allocate/release executes inside one mutex-guarded critical
//! section so concurrent task starts and completions can never under- or
//! double-count capacity. A naive check-then-act sequence is only safe
//! under a non-parallel scheduling loop; this engine dispatches tasks
//! concurrently, so the check and the reservation are one atomic step.

use crate::errors::ResourceError;
use crate::model::ResourceRequirements;
use crate::utils::{now, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, warn};

/// 24 hours of samples at one per minute.
const USAGE_HISTORY_CAP: usize = 1440;

/// A live reservation of capacity for a running task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    /// The task holding the reservation.
    pub task_id: String,
    /// Reserved CPU cores.
    pub cpu_cores: f64,
    /// Reserved memory in gigabytes.
    pub memory_gb: f64,
    /// Reserved GPUs.
    pub gpu_count: u32,
    /// Reserved disk in gigabytes. Tracked but never admission-gated.
    pub disk_gb: Option<f64>,
    /// When the reservation was made.
    pub allocated_at: Timestamp,
}

/// Point-in-time utilization of one resource dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUtilization {
    /// Total pool capacity.
    pub total: f64,
    /// Currently allocated amount.
    pub allocated: f64,
    /// Remaining capacity.
    pub available: f64,
    /// Allocated share in percent.
    pub percent: f64,
}

impl ResourceUtilization {
    fn new(total: f64, allocated: f64) -> Self {
        let percent = if total > 0.0 {
            allocated / total * 100.0
        } else {
            0.0
        };
        Self {
            total,
            allocated,
            available: total - allocated,
            percent,
        }
    }
}

/// Per-resource utilization plus active-task count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationStats {
    /// CPU utilization.
    pub cpu: ResourceUtilization,
    /// Memory utilization.
    pub memory: ResourceUtilization,
    /// GPU utilization.
    pub gpu: ResourceUtilization,
    /// Number of tasks holding allocations.
    pub active_tasks: usize,
}

/// One periodic usage sample in the bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    /// When the sample was taken.
    pub sampled_at: Timestamp,
    /// Host one-minute load average.
    pub host_cpu_load: f64,
    /// Host memory in use, in gigabytes.
    pub host_memory_used_gb: f64,
    /// Pool CPU cores allocated at sample time.
    pub allocated_cpu: f64,
    /// Pool memory allocated at sample time, in gigabytes.
    pub allocated_memory_gb: f64,
    /// Pool GPUs allocated at sample time.
    pub allocated_gpu: u32,
}

#[derive(Debug, Default)]
struct PoolState {
    allocated_cpu: f64,
    allocated_memory_gb: f64,
    allocated_gpu: u32,
    allocations: HashMap<String, ResourceAllocation>,
    history: VecDeque<UsageSample>,
}

/// Tracks total vs. allocated capacity and gates task admission.
#[derive(Debug)]
pub struct ResourceManager {
    total_cpu: f64,
    total_memory_gb: f64,
    total_gpu: u32,
    state: Mutex<PoolState>,
}

impl ResourceManager {
    /// Creates a manager over the given pool totals.
    #[must_use]
    pub fn new(total_cpu: f64, total_memory_gb: f64, total_gpu: u32) -> Self {
        Self {
            total_cpu,
            total_memory_gb,
            total_gpu,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Returns true when current free capacity satisfies the requirement.
    ///
    /// Advisory only; `allocate` re-checks under the same lock it reserves
    /// with.
    #[must_use]
    pub fn can_allocate(&self, requirements: &ResourceRequirements) -> bool {
        let state = self.state.lock();
        self.fits_available(&state, requirements).is_none()
    }

    /// Returns true when the requirement could ever be satisfied by an
    /// empty pool. Used for optional submission-time validation.
    #[must_use]
    pub fn fits_total(&self, requirements: &ResourceRequirements) -> bool {
        requirements.cpu_cores <= self.total_cpu
            && requirements.memory_gb <= self.total_memory_gb
            && requirements.gpu_count <= self.total_gpu
    }

    /// Returns true when any capacity remains for new work.
    #[must_use]
    pub fn has_baseline_capacity(&self) -> bool {
        let state = self.state.lock();
        state.allocated_cpu < self.total_cpu && state.allocated_memory_gb < self.total_memory_gb
    }

    /// Reserves capacity for a task.
    ///
    /// Fails when the task already holds an allocation or free capacity is
    /// insufficient. Check and reservation happen in one critical section.
    pub fn allocate(
        &self,
        task_id: &str,
        requirements: &ResourceRequirements,
    ) -> Result<ResourceAllocation, ResourceError> {
        let mut state = self.state.lock();

        if state.allocations.contains_key(task_id) {
            return Err(ResourceError::AlreadyAllocated {
                task_id: task_id.to_string(),
            });
        }
        if let Some(err) = self.fits_available(&state, requirements) {
            return Err(ResourceError::Insufficient {
                task_id: task_id.to_string(),
                resource: err.0,
                requested: err.1,
                available: err.2,
            });
        }

        state.allocated_cpu += requirements.cpu_cores;
        state.allocated_memory_gb += requirements.memory_gb;
        state.allocated_gpu += requirements.gpu_count;

        let allocation = ResourceAllocation {
            task_id: task_id.to_string(),
            cpu_cores: requirements.cpu_cores,
            memory_gb: requirements.memory_gb,
            gpu_count: requirements.gpu_count,
            disk_gb: requirements.disk_gb,
            allocated_at: now(),
        };
        state
            .allocations
            .insert(task_id.to_string(), allocation.clone());

        debug!(
            task_id,
            cpu = requirements.cpu_cores,
            memory_gb = requirements.memory_gb,
            gpu = requirements.gpu_count,
            "allocated resources"
        );
        Ok(allocation)
    }

    /// Frees a task's reservation.
    ///
    /// Returns false (with a warning) when no allocation exists; releasing
    /// twice is a safe no-op, so a cancellation racing a natural completion
    /// frees capacity exactly once.
    pub fn release(&self, task_id: &str) -> bool {
        let mut state = self.state.lock();
        match state.allocations.remove(task_id) {
            Some(allocation) => {
                state.allocated_cpu = (state.allocated_cpu - allocation.cpu_cores).max(0.0);
                state.allocated_memory_gb =
                    (state.allocated_memory_gb - allocation.memory_gb).max(0.0);
                state.allocated_gpu = state.allocated_gpu.saturating_sub(allocation.gpu_count);
                debug!(task_id, "released resources");
                true
            }
            None => {
                warn!(task_id, "release for task without a live allocation");
                false
            }
        }
    }

    /// Per-resource totals, allocated, available, percentage, plus the
    /// active-task count.
    #[must_use]
    pub fn utilization_stats(&self) -> UtilizationStats {
        let state = self.state.lock();
        UtilizationStats {
            cpu: ResourceUtilization::new(self.total_cpu, state.allocated_cpu),
            memory: ResourceUtilization::new(self.total_memory_gb, state.allocated_memory_gb),
            gpu: ResourceUtilization::new(f64::from(self.total_gpu), f64::from(state.allocated_gpu)),
            active_tasks: state.allocations.len(),
        }
    }

    /// Advisory, non-enforced tuning heuristics.
    #[must_use]
    pub fn optimization_recommendations(&self) -> Vec<String> {
        let stats = self.utilization_stats();
        let mut recommendations = Vec::new();

        for (name, util) in [
            ("cpu", stats.cpu),
            ("memory", stats.memory),
            ("gpu", stats.gpu),
        ] {
            if util.percent > 90.0 {
                recommendations.push(format!(
                    "{name} utilization at {:.1}%: add capacity or reduce concurrent tasks",
                    util.percent
                ));
            } else if util.total > 0.0 && util.percent < 25.0 {
                recommendations.push(format!(
                    "{name} utilization at {:.1}%: pool can support more concurrent tasks",
                    util.percent
                ));
            }
        }

        recommendations
    }

    /// Records one usage sample into the bounded 24-hour history.
    pub fn record_usage_sample(&self, host_cpu_load: f64, host_memory_used_gb: f64) {
        let mut state = self.state.lock();
        let sample = UsageSample {
            sampled_at: now(),
            host_cpu_load,
            host_memory_used_gb,
            allocated_cpu: state.allocated_cpu,
            allocated_memory_gb: state.allocated_memory_gb,
            allocated_gpu: state.allocated_gpu,
        };
        state.history.push_back(sample);
        while state.history.len() > USAGE_HISTORY_CAP {
            state.history.pop_front();
        }
    }

    /// Snapshot of the usage history.
    #[must_use]
    pub fn usage_history(&self) -> Vec<UsageSample> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Flags allocations held beyond the ceiling.
    ///
    /// Stuck allocations are logged, never force-released; a task that
    /// legitimately runs for hours keeps its reservation.
    pub fn detect_stuck_allocations(&self, ceiling: Duration) -> Vec<String> {
        let state = self.state.lock();
        let cutoff = now()
            - chrono::Duration::from_std(ceiling).unwrap_or_else(|_| chrono::Duration::hours(6));

        let mut stuck: Vec<String> = state
            .allocations
            .values()
            .filter(|a| a.allocated_at < cutoff)
            .map(|a| a.task_id.clone())
            .collect();
        stuck.sort();

        for task_id in &stuck {
            warn!(task_id, ceiling_secs = ceiling.as_secs(), "allocation held beyond ceiling");
        }
        stuck
    }

    /// Snapshot of live allocations.
    #[must_use]
    pub fn active_allocations(&self) -> Vec<ResourceAllocation> {
        let mut allocations: Vec<ResourceAllocation> =
            self.state.lock().allocations.values().cloned().collect();
        allocations.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        allocations
    }

    /// Names the first resource dimension the requirement does not fit, or
    /// `None` when it fits. Caller must hold the state lock.
    fn fits_available(
        &self,
        state: &PoolState,
        requirements: &ResourceRequirements,
    ) -> Option<(String, f64, f64)> {
        let available_cpu = self.total_cpu - state.allocated_cpu;
        if requirements.cpu_cores > available_cpu {
            return Some(("cpu".to_string(), requirements.cpu_cores, available_cpu));
        }
        let available_memory = self.total_memory_gb - state.allocated_memory_gb;
        if requirements.memory_gb > available_memory {
            return Some(("memory".to_string(), requirements.memory_gb, available_memory));
        }
        let available_gpu = self.total_gpu - state.allocated_gpu;
        if requirements.gpu_count > available_gpu {
            return Some((
                "gpu".to_string(),
                f64::from(requirements.gpu_count),
                f64::from(available_gpu),
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn req(cpu: f64, memory: f64, gpu: u32) -> ResourceRequirements {
        ResourceRequirements::new(cpu, memory, gpu)
    }

    #[test]
    fn test_allocate_and_release() {
        let manager = ResourceManager::new(4.0, 16.0, 1);
        assert!(manager.can_allocate(&req(2.0, 8.0, 1)));

        manager.allocate("t1", &req(2.0, 8.0, 1)).unwrap();
        let stats = manager.utilization_stats();
        assert_eq!(stats.cpu.allocated, 2.0);
        assert_eq!(stats.memory.allocated, 8.0);
        assert_eq!(stats.gpu.allocated, 1.0);
        assert_eq!(stats.active_tasks, 1);

        assert!(manager.release("t1"));
        let stats = manager.utilization_stats();
        assert_eq!(stats.cpu.allocated, 0.0);
        assert_eq!(stats.active_tasks, 0);
    }

    #[test]
    fn test_double_allocate_rejected() {
        let manager = ResourceManager::new(4.0, 16.0, 1);
        manager.allocate("t1", &req(1.0, 1.0, 0)).unwrap();
        let err = manager.allocate("t1", &req(1.0, 1.0, 0)).unwrap_err();
        assert!(matches!(err, ResourceError::AlreadyAllocated { .. }));
    }

    #[test]
    fn test_insufficient_capacity_names_resource() {
        let manager = ResourceManager::new(4.0, 16.0, 1);
        let err = manager.allocate("t1", &req(1.0, 1.0, 2)).unwrap_err();
        match err {
            ResourceError::Insufficient { resource, .. } => assert_eq!(resource, "gpu"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_release_is_idempotent() {
        let manager = ResourceManager::new(4.0, 16.0, 1);
        manager.allocate("t1", &req(1.0, 1.0, 0)).unwrap();
        assert!(manager.release("t1"));
        assert!(!manager.release("t1"));
        assert_eq!(manager.utilization_stats().cpu.allocated, 0.0);
    }

    #[test]
    fn test_allocated_never_exceeds_totals() {
        let manager = ResourceManager::new(4.0, 16.0, 1);
        manager.allocate("t1", &req(3.0, 8.0, 1)).unwrap();
        assert!(manager.allocate("t2", &req(2.0, 1.0, 0)).is_err());
        assert!(manager.allocate("t3", &req(1.0, 1.0, 0)).is_ok());

        let stats = manager.utilization_stats();
        assert!(stats.cpu.allocated <= stats.cpu.total);
        assert!(stats.memory.allocated <= stats.memory.total);
        assert!(stats.gpu.allocated <= stats.gpu.total);
    }

    #[test]
    fn test_concurrent_allocation_conserves_capacity() {
        use std::sync::Arc;

        let manager = Arc::new(ResourceManager::new(8.0, 64.0, 0));
        let mut handles = Vec::new();

        // 16 threads race for 8 single-core slots.
        for i in 0..16 {
            let manager = manager.clone();
            handles.push(std::thread::spawn(move || {
                manager.allocate(&format!("t{i}"), &req(1.0, 1.0, 0)).is_ok()
            }));
        }

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();

        assert_eq!(granted, 8);
        let stats = manager.utilization_stats();
        assert_eq!(stats.cpu.allocated, 8.0);
        assert_eq!(stats.active_tasks, 8);
    }

    #[test]
    fn test_fits_total() {
        let manager = ResourceManager::new(4.0, 16.0, 1);
        assert!(manager.fits_total(&req(4.0, 16.0, 1)));
        assert!(!manager.fits_total(&req(4.0, 16.0, 2)));
    }

    #[test]
    fn test_recommendations_thresholds() {
        let manager = ResourceManager::new(4.0, 16.0, 0);
        // Empty pool: low-utilization suggestions for cpu and memory.
        let recs = manager.optimization_recommendations();
        assert_eq!(recs.len(), 2);
        assert!(recs.iter().all(|r| r.contains("more concurrent tasks")));

        manager.allocate("t1", &req(3.9, 15.9, 0)).unwrap();
        let recs = manager.optimization_recommendations();
        assert_eq!(recs.len(), 2);
        assert!(recs.iter().all(|r| r.contains("add capacity")));
    }

    #[test]
    fn test_usage_history_bounded() {
        let manager = ResourceManager::new(4.0, 16.0, 0);
        for _ in 0..(USAGE_HISTORY_CAP + 10) {
            manager.record_usage_sample(0.5, 2.0);
        }
        assert_eq!(manager.usage_history().len(), USAGE_HISTORY_CAP);
    }

    #[test]
    fn test_stuck_allocation_detection() {
        let manager = ResourceManager::new(4.0, 16.0, 0);
        manager.allocate("t1", &req(1.0, 1.0, 0)).unwrap();

        assert!(manager.detect_stuck_allocations(Duration::from_secs(3600)).is_empty());
        // Zero ceiling: every allocation is older than "now".
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(
            manager.detect_stuck_allocations(Duration::ZERO),
            vec!["t1".to_string()]
        );
        // Detection never force-releases.
        assert_eq!(manager.utilization_stats().active_tasks, 1);
    }

    #[test]
    fn test_disk_tracked_but_not_gating() {
        let manager = ResourceManager::new(4.0, 16.0, 0);
        // Disk requirement far beyond anything sensible still admits.
        let r = req(1.0, 1.0, 0).with_disk_gb(1_000_000.0);
        let allocation = manager.allocate("t1", &r).unwrap();
        assert_eq!(allocation.disk_gb, Some(1_000_000.0));
    }
}
