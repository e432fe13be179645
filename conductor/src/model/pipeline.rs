//! Pipeline definition and DAG validation.

use super::Task;
use crate::core::TaskStatus;
use crate::errors::DagValidationError;
use crate::utils::{generate_uuid, now, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A directed acyclic graph of tasks.
///
/// The graph is formed by `upstream_tasks` references between the tasks in
/// the map. Validation is enforced before a pipeline is accepted by the
/// scheduler; an invalid pipeline is never scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    /// Unique pipeline id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// When the definition was created.
    pub created_at: Timestamp,
    /// Tasks keyed by id.
    pub tasks: HashMap<String, Task>,
    /// Pipeline-level parameter defaults, overridden by task-level values.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl Pipeline {
    /// Creates a new empty pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: generate_uuid(),
            name: name.into(),
            created_at: now(),
            tasks: HashMap::new(),
            parameters: HashMap::new(),
        }
    }

    /// Sets a pipeline-level parameter default.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Adds a task to the pipeline.
    ///
    /// Duplicate ids are rejected here since the task map cannot hold two
    /// tasks under one id.
    pub fn add_task(&mut self, task: Task) -> Result<(), DagValidationError> {
        if self.tasks.contains_key(&task.id) {
            return Err(DagValidationError::DuplicateTaskId {
                task: task.id,
            });
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true when the pipeline has no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks with no upstream dependencies.
    #[must_use]
    pub fn roots(&self) -> Vec<&Task> {
        let mut roots: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.upstream_tasks.is_empty())
            .collect();
        roots.sort_by(|a, b| a.id.cmp(&b.id));
        roots
    }

    /// Ids of tasks that directly depend on the given task.
    #[must_use]
    pub fn downstream_of(&self, task_id: &str) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .tasks
            .values()
            .filter(|t| t.upstream_tasks.contains(task_id))
            .map(|t| t.id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Validates the DAG, returning every error found (empty = valid).
    ///
    /// Checks: unknown upstream references, self-dependencies, and cycles
    /// (depth-first search with a recursion stack yielding the cycle path).
    #[must_use]
    pub fn validate_dag(&self) -> Vec<DagValidationError> {
        let mut errors = Vec::new();

        for task in self.tasks.values() {
            for upstream in &task.upstream_tasks {
                if upstream == &task.id {
                    errors.push(DagValidationError::SelfDependency {
                        task: task.id.clone(),
                    });
                } else if !self.tasks.contains_key(upstream) {
                    errors.push(DagValidationError::UnknownUpstream {
                        task: task.id.clone(),
                        upstream: upstream.clone(),
                    });
                }
            }
        }

        // Cycle detection only makes sense over resolvable edges.
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();
        let mut ids: Vec<&String> = self.tasks.keys().collect();
        ids.sort();

        for id in ids {
            if !visited.contains(id.as_str()) {
                if let Some(cycle) = self.dfs_cycle(id, &mut visited, &mut rec_stack, &mut path) {
                    errors.push(DagValidationError::CycleDetected { path: cycle });
                }
            }
        }

        errors.sort_by_key(ToString::to_string);
        errors.dedup();
        errors
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(task) = self.tasks.get(node) {
            let mut upstreams: Vec<&String> = task.upstream_tasks.iter().collect();
            upstreams.sort();
            for upstream in upstreams {
                if !self.tasks.contains_key(upstream) || upstream == node {
                    continue;
                }
                if !visited.contains(upstream.as_str()) {
                    if let Some(cycle) = self.dfs_cycle(upstream, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(upstream.as_str()) {
                    // Found a back edge; slice the cycle out of the path.
                    let start = path.iter().position(|n| n == upstream).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].to_vec();
                    cycle.push(upstream.clone());
                    return Some(cycle);
                }
            }
        }

        rec_stack.remove(node);
        path.pop();
        None
    }

    /// Returns every task eligible to start.
    ///
    /// A task is runnable iff its current status is `Pending` and every
    /// upstream task's status satisfies the dependency (success/skipped).
    #[must_use]
    pub fn runnable_tasks(&self, statuses: &HashMap<String, TaskStatus>) -> Vec<&Task> {
        let mut runnable: Vec<&Task> = self
            .tasks
            .values()
            .filter(|task| {
                statuses.get(&task.id).copied().unwrap_or_default() == TaskStatus::Pending
                    && task.upstream_tasks.iter().all(|up| {
                        statuses
                            .get(up)
                            .is_some_and(|s| s.satisfies_dependency())
                    })
            })
            .collect();
        runnable.sort_by(|a, b| a.id.cmp(&b.id));
        runnable
    }
}
