//! Core execution types: task status and task results.

mod result;
mod status;

pub use result::TaskResult;
pub use status::TaskStatus;
