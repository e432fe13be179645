//! DAG and task data model.
//!
//! Pure data plus validation logic; the only mutation after submission is
//! task status and timestamps, driven by the scheduler.

mod pipeline;
mod task;

pub use pipeline::Pipeline;
pub use task::{ResourceRequirements, RetryPolicy, Task};
