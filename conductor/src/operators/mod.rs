//! Operator capability interface and registry.
//!
//! An operator handles one task "kind". Anything exposing
//! `validate_parameters` / `execute` / `cleanup` may be registered under a
//! string key at runtime and resolved by the executor. Built-in keys:
//! `data_ingestion`, `data_validation`, `model_training`,
//! `model_registration`, `custom_script`.

mod builtin;
mod registration;
mod script;

pub use builtin::{DataIngestionOperator, DataValidationOperator, ModelTrainingOperator};
pub use registration::ModelRegistrationOperator;
pub use script::CustomScriptOperator;

use crate::core::TaskResult;
use crate::model::Task;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Opaque key-value parameter or output map.
pub type JsonMap = HashMap<String, serde_json::Value>;

/// Upstream context: output data keyed by upstream task id.
pub type ContextMap = HashMap<String, JsonMap>;

/// Trait for pluggable task operators.
#[async_trait]
pub trait Operator: Send + Sync + Debug {
    /// The registry key this operator is looked up by.
    fn key(&self) -> &str;

    /// Validates merged parameters, returning every problem found
    /// (empty = valid).
    fn validate_parameters(&self, params: &JsonMap) -> Vec<String>;

    /// Executes one task against merged parameters and upstream context.
    async fn execute(&self, task: &Task, params: &JsonMap, context: &ContextMap) -> TaskResult;

    /// Releases any per-task scratch state.
    ///
    /// The executor invokes this after every execution regardless of
    /// outcome, so operators must tolerate cleanup for tasks that never
    /// acquired anything.
    async fn cleanup(&self, task_id: &str) {
        tracing::debug!(task_id, "operator cleanup (no-op)");
    }
}

/// String-keyed, runtime-extensible operator registry.
#[derive(Debug, Default)]
pub struct OperatorRegistry {
    operators: DashMap<String, Arc<dyn Operator>>,
}

impl OperatorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with all built-in operators registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.add_operator(Arc::new(DataIngestionOperator::new()));
        registry.add_operator(Arc::new(DataValidationOperator::new()));
        registry.add_operator(Arc::new(ModelTrainingOperator::new()));
        registry.add_operator(Arc::new(ModelRegistrationOperator::default()));
        registry.add_operator(Arc::new(CustomScriptOperator::new()));
        registry
    }

    /// Registers an operator under its own key, replacing any previous
    /// registration.
    pub fn add_operator(&self, operator: Arc<dyn Operator>) {
        self.operators
            .insert(operator.key().to_string(), operator);
    }

    /// Resolves an operator by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<dyn Operator>> {
        self.operators.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns true when the key is registered.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.operators.contains_key(key)
    }

    /// Lists registered keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.operators.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

/// Reads a required string parameter, pushing an error when missing.
pub(crate) fn require_str<'a>(
    params: &'a JsonMap,
    key: &str,
    errors: &mut Vec<String>,
) -> Option<&'a str> {
    match params.get(key).and_then(serde_json::Value::as_str) {
        Some(value) if !value.trim().is_empty() => Some(value),
        Some(_) => {
            errors.push(format!("parameter '{key}' must be a non-empty string"));
            None
        }
        None => {
            errors.push(format!("missing required parameter '{key}'"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = OperatorRegistry::with_builtins();
        assert_eq!(
            registry.keys(),
            vec![
                "custom_script",
                "data_ingestion",
                "data_validation",
                "model_registration",
                "model_training",
            ]
        );
    }

    #[test]
    fn test_unknown_key_resolves_none() {
        let registry = OperatorRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(!registry.contains("nope"));
    }

    #[test]
    fn test_runtime_extension_replaces() {
        let registry = OperatorRegistry::with_builtins();
        let before = registry.get("data_ingestion").unwrap();
        registry.add_operator(Arc::new(DataIngestionOperator::new()));
        let after = registry.get("data_ingestion").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_require_str() {
        let mut params = JsonMap::new();
        params.insert("source".to_string(), serde_json::json!("s3://x"));
        params.insert("empty".to_string(), serde_json::json!("  "));

        let mut errors = Vec::new();
        assert_eq!(require_str(&params, "source", &mut errors), Some("s3://x"));
        assert!(require_str(&params, "empty", &mut errors).is_none());
        assert!(require_str(&params, "missing", &mut errors).is_none());
        assert_eq!(errors.len(), 2);
    }
}
