//! The coordinating scheduler: submission, queueing, dispatch, retries,
//! cancellation, and completion.
//!
//! One logical loop ticks at a fixed interval; each tick promotes queued
//! runs under the concurrency ceiling, dispatches every runnable task the
//! resource pool can admit as an independently progressing unit of work,
//! and finalizes runs whose tasks are all terminal. The loop never blocks
//! on a task's own execution.

use super::{PipelineRun, RunStatus, RunStatusReport, SchedulerConfig, SchedulerMetrics};
use crate::cancellation::CancellationToken;
use crate::core::{TaskResult, TaskStatus};
use crate::errors::{ConductorError, DagValidationError, DagValidationErrors, ResourceError};
use crate::executor::TaskExecutor;
use crate::model::{Pipeline, Task};
use crate::operators::{JsonMap, OperatorRegistry};
use crate::resources::{spawn_monitor, ResourceManager, UtilizationStats};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Per-run execution state shared between the loop and dispatched units.
struct RunHandle {
    run: Mutex<PipelineRun>,
    cancel: Arc<CancellationToken>,
    units: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl RunHandle {
    fn new(run: PipelineRun) -> Arc<Self> {
        Arc::new(Self {
            run: Mutex::new(run),
            cancel: CancellationToken::new(),
            units: Mutex::new(HashMap::new()),
        })
    }

    fn run_id(&self) -> String {
        self.run.lock().run_id.clone()
    }
}

/// Resource allocations are keyed per run so identical task ids in
/// concurrent runs never collide.
fn alloc_key(run_id: &str, task_id: &str) -> String {
    format!("{run_id}:{task_id}")
}

/// The pipeline scheduler.
///
/// Explicitly constructed and dependency-injected; independent instances
/// carry independent pools, queues, and metrics, so they can coexist in
/// one process. The handle is cheaply cloneable and shares all state.
#[derive(Clone)]
pub struct PipelineScheduler {
    config: SchedulerConfig,
    resources: Arc<ResourceManager>,
    executor: TaskExecutor,
    active: Arc<DashMap<String, Arc<RunHandle>>>,
    queued: Arc<Mutex<VecDeque<Arc<RunHandle>>>>,
    completed: Arc<Mutex<VecDeque<Arc<RunHandle>>>>,
    metrics: Arc<Mutex<SchedulerMetrics>>,
    shutdown: Arc<CancellationToken>,
    loops: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl std::fmt::Debug for PipelineScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineScheduler")
            .field("active_runs", &self.active.len())
            .field("queued_runs", &self.queued.lock().len())
            .finish_non_exhaustive()
    }
}

impl PipelineScheduler {
    /// Creates a scheduler with the built-in operator registry.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_registry(config, Arc::new(OperatorRegistry::with_builtins()))
    }

    /// Creates a scheduler over a caller-provided operator registry.
    #[must_use]
    pub fn with_registry(config: SchedulerConfig, registry: Arc<OperatorRegistry>) -> Self {
        let resources = Arc::new(ResourceManager::new(
            config.total_cpu_cores,
            config.total_memory_gb,
            config.total_gpu_count,
        ));
        Self {
            config,
            resources,
            executor: TaskExecutor::new(registry),
            active: Arc::new(DashMap::new()),
            queued: Arc::new(Mutex::new(VecDeque::new())),
            completed: Arc::new(Mutex::new(VecDeque::new())),
            metrics: Arc::new(Mutex::new(SchedulerMetrics::default())),
            shutdown: CancellationToken::new(),
            loops: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The operator registry tasks are resolved against.
    #[must_use]
    pub fn registry(&self) -> &Arc<OperatorRegistry> {
        self.executor.registry()
    }

    /// The resource pool backing admission control.
    #[must_use]
    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    /// Starts the scheduling loop, heartbeat loop, and resource monitor.
    pub fn start(&self) {
        let mut loops = self.loops.lock();
        if !loops.is_empty() {
            warn!("scheduler already started");
            return;
        }

        let scheduler = self.clone();
        loops.push(tokio::spawn(async move {
            let mut ticker = interval(scheduler.config.tick_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.tick(),
                    () = scheduler.shutdown.cancelled() => break,
                }
            }
        }));

        let scheduler = self.clone();
        loops.push(tokio::spawn(async move {
            let mut ticker = interval(scheduler.config.heartbeat_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.heartbeat(),
                    () = scheduler.shutdown.cancelled() => break,
                }
            }
        }));

        loops.push(spawn_monitor(
            Arc::clone(&self.resources),
            self.config.monitor_interval,
            self.config.stuck_allocation_ceiling,
            Arc::clone(&self.shutdown),
        ));

        info!(
            max_concurrent_runs = self.config.max_concurrent_runs,
            tick_secs = self.config.tick_interval.as_secs_f64(),
            "scheduler started"
        );
    }

    /// Stops the background loops. Active runs are left in place.
    pub fn shutdown(&self) {
        self.shutdown.cancel("scheduler shutdown");
        for handle in self.loops.lock().drain(..) {
            handle.abort();
        }
        info!("scheduler stopped");
    }

    /// Submits a pipeline for execution.
    ///
    /// Invalid DAGs are rejected with the full validation error list and
    /// never scheduled. The run starts immediately when the active-run
    /// count is below the ceiling and baseline capacity exists; otherwise
    /// it is enqueued in submission order.
    pub fn submit(
        &self,
        pipeline: Pipeline,
        triggered_by: impl Into<String>,
        parameters: JsonMap,
    ) -> Result<String, ConductorError> {
        if pipeline.is_empty() {
            return Err(DagValidationErrors::new(vec![DagValidationError::EmptyPipeline]).into());
        }
        let errors = pipeline.validate_dag();
        if !errors.is_empty() {
            return Err(DagValidationErrors::new(errors).into());
        }
        if self.config.validate_capacity_at_submission {
            for task in pipeline.tasks.values() {
                if !self.resources.fits_total(&task.resources) {
                    return Err(ConductorError::Capacity(format!(
                        "task '{}' requirements exceed total pool capacity",
                        task.id
                    )));
                }
            }
        }

        let run = PipelineRun::new(pipeline, triggered_by, parameters);
        let run_id = run.run_id.clone();
        let handle = RunHandle::new(run);
        self.metrics.lock().runs_submitted += 1;

        if self.active.len() < self.config.max_concurrent_runs
            && self.resources.has_baseline_capacity()
        {
            self.activate(handle);
            info!(run_id = %run_id, "run started");
        } else {
            self.queued.lock().push_back(handle);
            info!(run_id = %run_id, "run queued");
        }
        Ok(run_id)
    }

    /// Cancels a run.
    ///
    /// Active runs: signals every dispatched unit to stop, releases held
    /// allocations exactly once, and marks non-terminal tasks cancelled.
    /// Queued runs are removed and marked cancelled. Returns false for an
    /// unknown or already-finished run.
    pub fn cancel(&self, run_id: &str) -> bool {
        // DashMap::remove is the linearization point: concurrent
        // double-cancel sees Some exactly once.
        if let Some((_, handle)) = self.active.remove(run_id) {
            handle.cancel.cancel("run cancelled");

            let duration = {
                let mut run = handle.run.lock();
                let ids: Vec<String> = run.pipeline.tasks.keys().cloned().collect();
                for id in ids {
                    let status = run.pipeline.tasks[&id].status;
                    if status.is_terminal() {
                        continue;
                    }
                    if status == TaskStatus::Running {
                        self.resources.release(&alloc_key(run_id, &id));
                    }
                    if let Some(task) = run.pipeline.tasks.get_mut(&id) {
                        task.mark_terminal(TaskStatus::Cancelled, Some("run cancelled".to_string()));
                    }
                }
                run.finalize(RunStatus::Cancelled);
                run.duration_seconds().unwrap_or(0.0)
            };

            handle.units.lock().clear();
            self.metrics
                .lock()
                .record_run_completion(RunStatus::Cancelled, duration);
            self.retain_completed(handle);
            info!(run_id, "run cancelled");
            return true;
        }

        let queued_handle = {
            let mut queued = self.queued.lock();
            queued
                .iter()
                .position(|h| h.run.lock().run_id == run_id)
                .and_then(|pos| queued.remove(pos))
        };
        if let Some(handle) = queued_handle {
            handle.cancel.cancel("run cancelled");
            {
                let mut run = handle.run.lock();
                for task in run.pipeline.tasks.values_mut() {
                    task.mark_terminal(TaskStatus::Cancelled, Some("run cancelled".to_string()));
                }
                run.finalize(RunStatus::Cancelled);
            }
            self.metrics
                .lock()
                .record_run_completion(RunStatus::Cancelled, 0.0);
            self.retain_completed(handle);
            info!(run_id, "queued run cancelled");
            return true;
        }

        false
    }

    /// Current state of a run, wherever it lives.
    #[must_use]
    pub fn get_status(&self, run_id: &str) -> Option<RunStatusReport> {
        if let Some(handle) = self.active.get(run_id) {
            return Some(RunStatusReport::from_run(&handle.run.lock()));
        }
        if let Some(report) = self
            .queued
            .lock()
            .iter()
            .find(|h| h.run.lock().run_id == run_id)
            .map(|h| RunStatusReport::from_run(&h.run.lock()))
        {
            return Some(report);
        }
        self.completed
            .lock()
            .iter()
            .find(|h| h.run.lock().run_id == run_id)
            .map(|h| RunStatusReport::from_run(&h.run.lock()))
    }

    /// Number of currently active runs.
    #[must_use]
    pub fn active_run_count(&self) -> usize {
        self.active.len()
    }

    /// Number of queued runs.
    #[must_use]
    pub fn queued_run_count(&self) -> usize {
        self.queued.lock().len()
    }

    /// Number of retained completed runs.
    #[must_use]
    pub fn completed_run_count(&self) -> usize {
        self.completed.lock().len()
    }

    /// Snapshot of the scheduler metrics.
    #[must_use]
    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics.lock().clone()
    }

    /// Snapshot of current resource utilization.
    #[must_use]
    pub fn utilization(&self) -> UtilizationStats {
        self.resources.utilization_stats()
    }

    /// One pass of the scheduling loop.
    fn tick(&self) {
        self.promote_queued();

        let handles: Vec<(String, Arc<RunHandle>)> = self
            .active
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        for (run_id, handle) in handles {
            // A problem updating one run must never halt the loop or
            // affect other runs.
            self.dispatch_ready(&run_id, &handle);
            self.maybe_finalize(&run_id, &handle);
        }

        self.prune_completed();
    }

    /// Promotes queued runs while the ceiling and pool allow.
    fn promote_queued(&self) {
        loop {
            if self.active.len() >= self.config.max_concurrent_runs
                || !self.resources.has_baseline_capacity()
            {
                return;
            }
            let Some(handle) = self.queued.lock().pop_front() else {
                return;
            };
            if handle.cancel.is_cancelled() {
                continue;
            }
            let run_id = handle.run_id();
            self.activate(handle);
            info!(run_id = %run_id, "queued run promoted");
        }
    }

    fn activate(&self, handle: Arc<RunHandle>) {
        let run_id = {
            let mut run = handle.run.lock();
            run.status = RunStatus::Running;
            run.started_at = Some(crate::utils::now());
            run.run_id.clone()
        };
        self.active.insert(run_id, handle);
    }

    /// Dispatches every runnable task the pool can currently admit.
    fn dispatch_ready(&self, run_id: &str, handle: &Arc<RunHandle>) {
        if handle.cancel.is_cancelled() {
            return;
        }

        let runnable: Vec<String> = {
            let mut run = handle.run.lock();
            skip_downstream_of_failures(&mut run);
            run.runnable_task_ids()
        };

        for task_id in runnable {
            let requirements = {
                let run = handle.run.lock();
                let Some(task) = run.pipeline.tasks.get(&task_id) else {
                    warn!(run_id, task_id, "runnable task vanished");
                    continue;
                };
                task.resources.clone()
            };

            match self
                .resources
                .allocate(&alloc_key(run_id, &task_id), &requirements)
            {
                Ok(_) => self.dispatch_task(run_id, handle, &task_id),
                Err(ResourceError::Insufficient { resource, .. }) => {
                    // Capacity deferral, not an error: the task stays
                    // pending until capacity frees.
                    debug!(run_id, task_id, resource = %resource, "task deferred on capacity");
                }
                Err(err @ ResourceError::AlreadyAllocated { .. }) => {
                    warn!(run_id, task_id, error = %err, "unexpected live allocation");
                }
            }
        }
    }

    /// Flips a task to running and spawns its unit of work.
    fn dispatch_task(&self, run_id: &str, handle: &Arc<RunHandle>, task_id: &str) {
        let snapshot = {
            let mut run = handle.run.lock();
            let Some(task) = run.pipeline.tasks.get_mut(task_id) else {
                self.resources.release(&alloc_key(run_id, task_id));
                return;
            };
            if task.status != TaskStatus::Pending {
                self.resources.release(&alloc_key(run_id, task_id));
                return;
            }
            task.mark_running();
            let task = task.clone();

            // Pipeline-level defaults under run-level parameters; the
            // executor applies task-level overrides on top.
            let mut params = run.pipeline.parameters.clone();
            params.extend(run.parameters.clone());
            (task, params, run.task_outputs.clone())
        };
        let (task, params, outputs) = snapshot;

        debug!(run_id, task_id, operator = %task.operator, "dispatching task");

        let scheduler = self.clone();
        let run_handle = Arc::clone(handle);
        let run_id = run_id.to_string();
        let id_for_map = task_id.to_string();

        let unit = tokio::spawn(async move {
            let result = scheduler
                .executor
                .execute_task_cancellable(&task, &params, &outputs, Some(run_handle.cancel.as_ref()))
                .await;
            scheduler.on_task_complete(&run_id, &run_handle, &task, result);
        });
        handle.units.lock().insert(id_for_map, unit);
    }

    /// Records a finished attempt and decides success, retry, or failure.
    fn on_task_complete(
        &self,
        run_id: &str,
        handle: &Arc<RunHandle>,
        task: &Task,
        result: TaskResult,
    ) {
        // Release before anything else so capacity frees even when the
        // run was concurrently cancelled (release is idempotent).
        self.resources.release(&alloc_key(run_id, &task.id));
        self.metrics.lock().tasks_executed += 1;

        let mut retry_delay = None;
        {
            let mut run = handle.run.lock();
            if handle.cancel.is_cancelled() {
                // The cancellation path owns final statuses.
                return;
            }
            if result.success {
                run.record_task_output(&task.id, result.output_data.clone());
            }
            let Some(stored) = run.pipeline.tasks.get_mut(&task.id) else {
                return;
            };
            if stored.status != TaskStatus::Running {
                return;
            }

            if result.success {
                stored.mark_terminal(TaskStatus::Success, None);
                debug!(run_id, task_id = %task.id, "task succeeded");
            } else if stored.retry_policy.should_retry(stored.retry_count) {
                stored.retry_count += 1;
                stored.status = TaskStatus::Retry;
                stored.error_message = result.error_message.clone();
                let delay = stored.retry_policy.delay_for_attempt(stored.retry_count);
                warn!(
                    run_id,
                    task_id = %task.id,
                    attempt = stored.retry_count,
                    delay_secs = delay.as_secs_f64(),
                    error = result.error_message.as_deref().unwrap_or("unknown"),
                    "task failed, retrying after backoff"
                );
                retry_delay = Some(delay);
            } else {
                stored.mark_terminal(TaskStatus::Failed, result.error_message.clone());
                warn!(
                    run_id,
                    task_id = %task.id,
                    retries = stored.retry_count,
                    error = result.error_message.as_deref().unwrap_or("unknown"),
                    "task failed terminally"
                );
            }
        }

        handle.units.lock().remove(&task.id);
        if let Some(delay) = retry_delay {
            spawn_retry_timer(Arc::clone(handle), task.id.clone(), delay);
        }
    }

    /// Finalizes a run whose tasks are all terminal.
    fn maybe_finalize(&self, run_id: &str, handle: &Arc<RunHandle>) {
        let finalized = {
            let mut run = handle.run.lock();
            if run.status.is_terminal() || !run.is_complete() {
                None
            } else {
                let status = run.derive_status();
                run.finalize(status);
                Some((status, run.duration_seconds().unwrap_or(0.0)))
            }
        };

        let Some((status, duration)) = finalized else {
            return;
        };

        self.metrics.lock().record_run_completion(status, duration);
        if let Some((_, handle)) = self.active.remove(run_id) {
            handle.units.lock().clear();
            self.retain_completed(handle);
        }
        info!(run_id, %status, duration_secs = duration, "run finalized");
    }

    fn retain_completed(&self, handle: Arc<RunHandle>) {
        self.completed.lock().push_back(handle);
        self.prune_completed();
    }

    /// Drops completed-run history beyond the retention cap.
    fn prune_completed(&self) {
        let mut completed = self.completed.lock();
        while completed.len() > self.config.completed_run_retention {
            completed.pop_front();
        }
    }

    /// Logs scheduler health; makes no scheduling decisions.
    fn heartbeat(&self) {
        let stats = self.resources.utilization_stats();
        info!(
            active_runs = self.active.len(),
            queued_runs = self.queued.lock().len(),
            completed_runs = self.completed.lock().len(),
            cpu_percent = stats.cpu.percent,
            memory_percent = stats.memory.percent,
            gpu_percent = stats.gpu.percent,
            active_tasks = stats.active_tasks,
            "scheduler heartbeat"
        );
    }
}

/// Marks every pending task downstream of a terminally failed or cancelled
/// task as skipped, transitively, so the run can complete.
fn skip_downstream_of_failures(run: &mut PipelineRun) {
    let mut frontier: Vec<String> = run
        .pipeline
        .tasks
        .values()
        .filter(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Cancelled))
        .map(|t| t.id.clone())
        .collect();
    let mut blocked: HashSet<String> = frontier.iter().cloned().collect();

    while let Some(id) = frontier.pop() {
        let downstream: Vec<String> = run
            .pipeline
            .downstream_of(&id)
            .iter()
            .map(|s| (*s).to_string())
            .collect();
        for down in downstream {
            if blocked.insert(down.clone()) {
                frontier.push(down);
            }
        }
    }

    for id in blocked {
        if let Some(task) = run.pipeline.tasks.get_mut(&id) {
            if task.status == TaskStatus::Pending {
                task.mark_terminal(
                    TaskStatus::Skipped,
                    Some("upstream task failed".to_string()),
                );
            }
        }
    }
}

/// Cancellable backoff timer: re-enters the task into the pending state
/// after the delay unless the run was cancelled in the meantime.
fn spawn_retry_timer(handle: Arc<RunHandle>, task_id: String, delay: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(delay) => {
                if handle.cancel.is_cancelled() {
                    return;
                }
                let mut run = handle.run.lock();
                if let Some(task) = run.pipeline.tasks.get_mut(&task_id) {
                    if task.status == TaskStatus::Retry {
                        task.status = TaskStatus::Pending;
                        task.started_at = None;
                    }
                }
            }
            () = handle.cancel.cancelled() => {}
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceRequirements;

    #[test]
    fn test_alloc_key_disambiguates_runs() {
        assert_ne!(alloc_key("run1", "ingest"), alloc_key("run2", "ingest"));
    }

    #[test]
    fn test_skip_propagates_transitively() {
        let mut pipeline = Pipeline::new("p");
        pipeline.add_task(Task::new("a", "a", "noop")).unwrap();
        pipeline
            .add_task(Task::new("b", "b", "noop").with_upstream("a"))
            .unwrap();
        pipeline
            .add_task(Task::new("c", "c", "noop").with_upstream("b"))
            .unwrap();
        let mut run = PipelineRun::new(pipeline, "tests", JsonMap::new());
        run.pipeline.tasks.get_mut("a").unwrap().status = TaskStatus::Failed;

        skip_downstream_of_failures(&mut run);

        assert_eq!(run.pipeline.tasks["b"].status, TaskStatus::Skipped);
        assert_eq!(run.pipeline.tasks["c"].status, TaskStatus::Skipped);
        assert!(run.is_complete());
        assert_eq!(run.derive_status(), RunStatus::Failed);
    }

    #[test]
    fn test_submit_rejects_invalid_dag() {
        let scheduler = PipelineScheduler::new(SchedulerConfig::default());
        let mut pipeline = Pipeline::new("cyclic");
        pipeline
            .add_task(Task::new("a", "a", "data_ingestion").with_upstream("b"))
            .unwrap();
        pipeline
            .add_task(Task::new("b", "b", "data_ingestion").with_upstream("a"))
            .unwrap();

        let err = scheduler.submit(pipeline, "tests", JsonMap::new()).unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
        assert_eq!(scheduler.active_run_count(), 0);
        assert_eq!(scheduler.queued_run_count(), 0);
    }

    #[test]
    fn test_submit_rejects_empty_pipeline() {
        let scheduler = PipelineScheduler::new(SchedulerConfig::default());
        let err = scheduler
            .submit(Pipeline::new("empty"), "tests", JsonMap::new())
            .unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
    }

    #[test]
    fn test_capacity_validation_flag() {
        let config = SchedulerConfig::default()
            .with_capacity(2.0, 4.0, 0)
            .with_capacity_validation();
        let scheduler = PipelineScheduler::new(config);

        let mut pipeline = Pipeline::new("greedy");
        pipeline
            .add_task(
                Task::new("big", "big", "data_ingestion")
                    .with_resources(ResourceRequirements::new(8.0, 1.0, 0)),
            )
            .unwrap();

        let err = scheduler.submit(pipeline, "tests", JsonMap::new()).unwrap_err();
        assert!(matches!(err, ConductorError::Capacity(_)));
    }

    #[test]
    fn test_cancel_unknown_run_returns_false() {
        let scheduler = PipelineScheduler::new(SchedulerConfig::default());
        assert!(!scheduler.cancel("no-such-run"));
    }
}
