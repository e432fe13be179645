//! Pipeline run scheduling.
//!
//! This module provides:
//! - Run state and status reporting
//! - Scheduler configuration
//! - Execution metrics
//! - The coordinating scheduler loop

mod config;
mod engine;
mod metrics;
mod run;

pub use config::SchedulerConfig;
pub use engine::PipelineScheduler;
pub use metrics::SchedulerMetrics;
pub use run::{PipelineRun, RunStatus, RunStatusReport};
