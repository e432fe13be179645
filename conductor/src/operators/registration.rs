//! Model registration operator backed by an external model registry.

use super::{require_str, ContextMap, JsonMap, Operator};
use crate::core::TaskResult;
use crate::model::Task;
use crate::utils::iso_timestamp;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::info;

const DEFAULT_REGISTRY_URL: &str = "http://localhost:8000/api/v1/models";
const REGISTRY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct RegistryResponse {
    model_id: String,
}

/// Registers a trained model with the external registry service.
///
/// Network or validation failures from the registry propagate as task
/// failure and are retried per the task's retry policy.
#[derive(Debug)]
pub struct ModelRegistrationOperator {
    client: reqwest::Client,
    default_registry_url: String,
}

impl Default for ModelRegistrationOperator {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_URL)
    }
}

impl ModelRegistrationOperator {
    /// Creates the operator with a default registry endpoint.
    ///
    /// Individual tasks may override the endpoint via the `registry_url`
    /// parameter.
    #[must_use]
    pub fn new(registry_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_registry_url: registry_url.into(),
        }
    }
}

#[async_trait]
impl Operator for ModelRegistrationOperator {
    fn key(&self) -> &str {
        "model_registration"
    }

    fn validate_parameters(&self, params: &JsonMap) -> Vec<String> {
        let mut errors = Vec::new();
        require_str(params, "model_name", &mut errors);
        if let Some(tags) = params.get("tags") {
            if !tags.is_array() {
                errors.push("parameter 'tags' must be an array".to_string());
            }
        }
        errors
    }

    async fn execute(&self, task: &Task, params: &JsonMap, context: &ContextMap) -> TaskResult {
        let model_name = params
            .get("model_name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        let version = params
            .get("version")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("1.0.0");
        let url = params
            .get("registry_url")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(&self.default_registry_url);

        // Prefer the model path produced by an upstream training task.
        let model_path = context
            .values()
            .filter_map(|output| output.get("model_path"))
            .filter_map(serde_json::Value::as_str)
            .next();

        let body = json!({
            "name": model_name,
            "version": version,
            "description": params.get("description").cloned().unwrap_or(json!("")),
            "tags": params.get("tags").cloned().unwrap_or(json!([])),
            "model_path": model_path,
        });

        let response = self
            .client
            .post(url)
            .timeout(REGISTRY_TIMEOUT)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                return TaskResult::fail(&task.id, format!("model registry unreachable: {e}"))
            }
        };

        if !response.status().is_success() {
            return TaskResult::fail(
                &task.id,
                format!("model registry rejected '{model_name}': HTTP {}", response.status()),
            );
        }

        let parsed: RegistryResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                return TaskResult::fail(&task.id, format!("invalid registry response: {e}"))
            }
        };

        info!(task_id = %task.id, model_name, version, model_id = %parsed.model_id, "registered model");

        TaskResult::ok(
            &task.id,
            [
                ("model_id".to_string(), json!(parsed.model_id)),
                ("model_name".to_string(), json!(model_name)),
                ("version".to_string(), json!(version)),
                ("registered_at".to_string(), json!(iso_timestamp())),
            ]
            .into_iter()
            .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_model_name() {
        let op = ModelRegistrationOperator::default();
        let errors = op.validate_parameters(&JsonMap::new());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("model_name"));
    }

    #[test]
    fn test_tags_must_be_array() {
        let op = ModelRegistrationOperator::default();
        let params: JsonMap = [
            ("model_name".to_string(), json!("fraud")),
            ("tags".to_string(), json!("not-an-array")),
        ]
        .into_iter()
        .collect();
        let errors = op.validate_parameters(&params);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("tags"));
    }

    #[tokio::test]
    async fn test_unreachable_registry_fails_task() {
        // Reserved port with nothing listening.
        let op = ModelRegistrationOperator::new("http://127.0.0.1:9/api/v1/models");
        let task = Task::new("register", "Register", "model_registration");
        let params: JsonMap = [("model_name".to_string(), json!("fraud"))]
            .into_iter()
            .collect();

        let result = op.execute(&task, &params, &ContextMap::new()).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("unreachable"));
    }
}
