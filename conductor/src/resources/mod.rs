//! Resource admission control and capacity accounting.

mod monitor;
mod pool;

pub use monitor::{host_snapshot, spawn_monitor};
pub use pool::{
    ResourceAllocation, ResourceManager, ResourceUtilization, UsageSample, UtilizationStats,
};
