//! Task executor: resolves an operator and runs one task in isolation.
//!
//! The executor merges pipeline-level parameter defaults with task-level
//! overrides, builds the upstream context, enforces the uniform execution
//! timeout, and guarantees operator cleanup runs regardless of outcome.

use crate::cancellation::CancellationToken;
use crate::core::TaskResult;
use crate::model::Task;
use crate::operators::{ContextMap, JsonMap, OperatorRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Runs single tasks against the operator registry.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    registry: Arc<OperatorRegistry>,
}

impl TaskExecutor {
    /// Creates an executor over the given registry.
    #[must_use]
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self { registry }
    }

    /// The registry tasks are resolved against.
    #[must_use]
    pub fn registry(&self) -> &Arc<OperatorRegistry> {
        &self.registry
    }

    /// Executes one task.
    ///
    /// `pipeline_parameters` are defaults overridden by task-level values;
    /// `task_outputs` is the output data of completed upstream tasks keyed
    /// by task id (only the task's declared upstreams are exposed).
    pub async fn execute_task(
        &self,
        task: &Task,
        pipeline_parameters: &JsonMap,
        task_outputs: &ContextMap,
    ) -> TaskResult {
        self.execute_task_cancellable(task, pipeline_parameters, task_outputs, None)
            .await
    }

    /// Executes one task, honoring a cancellation token.
    ///
    /// Cancellation aborts the operator future (killing any subprocess it
    /// spawned); cleanup still runs afterwards.
    pub async fn execute_task_cancellable(
        &self,
        task: &Task,
        pipeline_parameters: &JsonMap,
        task_outputs: &ContextMap,
        cancel: Option<&CancellationToken>,
    ) -> TaskResult {
        let Some(operator) = self.registry.get(&task.operator) else {
            warn!(task_id = %task.id, operator = %task.operator, "unknown operator");
            return TaskResult::fail(
                &task.id,
                format!("unknown operator '{}' for task '{}'", task.operator, task.id),
            );
        };

        let merged = merge_parameters(pipeline_parameters, &task.parameters);
        let context = upstream_context(task, task_outputs);

        let validation_errors = operator.validate_parameters(&merged);
        if !validation_errors.is_empty() {
            operator.cleanup(&task.id).await;
            return TaskResult::fail(
                &task.id,
                format!("invalid parameters: {}", validation_errors.join("; ")),
            );
        }

        debug!(task_id = %task.id, operator = %task.operator, "executing task");

        let timeout = task.resources.timeout_seconds.map(Duration::from_secs);
        let execution = async {
            match timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, operator.execute(task, &merged, &context))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => TaskResult::fail(
                            &task.id,
                            format!("task timed out after {}s", limit.as_secs()),
                        ),
                    }
                }
                None => operator.execute(task, &merged, &context).await,
            }
        };

        let result = match cancel {
            Some(token) => tokio::select! {
                result = execution => result,
                () = token.cancelled() => TaskResult::fail(
                    &task.id,
                    format!(
                        "cancelled: {}",
                        token.reason().unwrap_or_else(|| "stop requested".to_string())
                    ),
                ),
            },
            None => execution.await,
        };

        // Scoped-acquisition discipline: cleanup runs on every path.
        operator.cleanup(&task.id).await;
        result
    }
}

/// Pipeline-level defaults overridden by task-level values.
fn merge_parameters(pipeline: &JsonMap, task: &JsonMap) -> JsonMap {
    let mut merged = pipeline.clone();
    merged.extend(task.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Context restricted to the task's declared upstream outputs.
fn upstream_context(task: &Task, task_outputs: &ContextMap) -> ContextMap {
    task.upstream_tasks
        .iter()
        .filter_map(|id| task_outputs.get(id).map(|out| (id.clone(), out.clone())))
        .collect()
}
