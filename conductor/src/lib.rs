//! # Conductor
//!
//! An ML pipeline orchestration and scheduling engine.
//!
//! Conductor accepts DAG definitions of multi-step workflows (ingest,
//! validate, train, register, ...) and drives each task through a retryable
//! execution lifecycle under finite compute capacity:
//!
//! - **DAG/task model**: Pipelines are maps of tasks with upstream
//!   dependencies, validated for cycles and dangling references
//! - **Pluggable operators**: Task kinds are resolved from a string-keyed,
//!   runtime-extensible registry
//! - **Admission control**: A resource manager atomically reserves CPU,
//!   memory, and GPU capacity before a task may start
//! - **Scheduling loop**: A single coordinating loop promotes queued runs,
//!   dispatches the runnable frontier, and handles retries and cancellation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use conductor::prelude::*;
//!
//! let mut pipeline = Pipeline::new("train-and-register");
//! pipeline.add_task(Task::new("ingest", "Ingest", "data_ingestion")
//!     .with_parameter("source", serde_json::json!("s3://bucket/data")))?;
//! pipeline.add_task(Task::new("train", "Train", "model_training")
//!     .with_parameter("model_type", serde_json::json!("xgboost"))
//!     .with_upstream("ingest"))?;
//!
//! let scheduler = PipelineScheduler::new(SchedulerConfig::default());
//! scheduler.start();
//! let run_id = scheduler.submit(pipeline, "ci", HashMap::new())?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod core;
pub mod errors;
pub mod executor;
pub mod model;
pub mod observability;
pub mod operators;
pub mod resources;
pub mod scheduler;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::core::{TaskResult, TaskStatus};
    pub use crate::errors::{
        ConductorError, DagValidationError, DagValidationErrors, ResourceError,
    };
    pub use crate::executor::TaskExecutor;
    pub use crate::model::{Pipeline, ResourceRequirements, RetryPolicy, Task};
    pub use crate::operators::{ContextMap, JsonMap, Operator, OperatorRegistry};
    pub use crate::resources::{ResourceAllocation, ResourceManager, UtilizationStats};
    pub use crate::scheduler::{
        PipelineRun, PipelineScheduler, RunStatus, RunStatusReport, SchedulerConfig,
        SchedulerMetrics,
    };
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
}
