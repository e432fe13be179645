//! Custom script operator: runs an external script in a subprocess.
//!
//! The script receives the task's declared environment variables plus one
//! `CONDUCTOR_INPUT_<UPSTREAM_ID>` variable holding the JSON-encoded output
//! of each upstream task. Exit code 0 is success; stdout and stderr are
//! captured verbatim into the output data.

use super::{require_str, ContextMap, JsonMap, Operator};
use crate::core::TaskResult;
use crate::model::Task;
use async_trait::async_trait;
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs an externally supplied script in a bounded subprocess.
#[derive(Debug, Default)]
pub struct CustomScriptOperator;

impl CustomScriptOperator {
    /// Creates the operator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn env_name(upstream_id: &str) -> String {
        let sanitized: String = upstream_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("CONDUCTOR_INPUT_{sanitized}")
    }

    fn build_command(task: &Task, params: &JsonMap, context: &ContextMap) -> Command {
        let script_path = params
            .get("script_path")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();

        let mut command = match params.get("interpreter").and_then(serde_json::Value::as_str) {
            Some(interpreter) => {
                let mut c = Command::new(interpreter);
                c.arg(script_path);
                c
            }
            None => Command::new(script_path),
        };

        if let Some(args) = params.get("args").and_then(serde_json::Value::as_array) {
            for arg in args.iter().filter_map(serde_json::Value::as_str) {
                command.arg(arg);
            }
        }

        command.envs(&task.env);
        for (upstream_id, output) in context {
            match serde_json::to_string(output) {
                Ok(encoded) => {
                    command.env(Self::env_name(upstream_id), encoded);
                }
                Err(e) => {
                    warn!(task_id = %task.id, upstream_id, error = %e, "skipping unencodable upstream output");
                }
            }
        }

        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Operator for CustomScriptOperator {
    fn key(&self) -> &str {
        "custom_script"
    }

    fn validate_parameters(&self, params: &JsonMap) -> Vec<String> {
        let mut errors = Vec::new();
        require_str(params, "script_path", &mut errors);
        if let Some(args) = params.get("args") {
            match args.as_array() {
                Some(items) if items.iter().all(serde_json::Value::is_string) => {}
                _ => errors.push("parameter 'args' must be an array of strings".to_string()),
            }
        }
        errors
    }

    async fn execute(&self, task: &Task, params: &JsonMap, context: &ContextMap) -> TaskResult {
        let mut command = Self::build_command(task, params, context);
        debug!(task_id = %task.id, "spawning script subprocess");

        // The engine's uniform timeout bounds the whole execution; the
        // explicit bound here covers direct invocations of the operator.
        let wait = command.output();
        let output = match task.resources.timeout_seconds {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), wait).await {
                Ok(result) => result,
                Err(_) => {
                    return TaskResult::fail(
                        &task.id,
                        format!("script timed out after {secs}s"),
                    );
                }
            },
            None => wait.await,
        };

        let output = match output {
            Ok(o) => o,
            Err(e) => return TaskResult::fail(&task.id, format!("failed to spawn script: {e}")),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        let data: JsonMap = [
            ("stdout".to_string(), json!(stdout)),
            ("stderr".to_string(), json!(stderr)),
            ("exit_code".to_string(), json!(exit_code)),
        ]
        .into_iter()
        .collect();

        if output.status.success() {
            TaskResult::ok(&task.id, data)
        } else {
            let mut result =
                TaskResult::fail(&task.id, format!("script exited with code {exit_code}: {stderr}"));
            result.output_data = data;
            result
        }
    }
}
