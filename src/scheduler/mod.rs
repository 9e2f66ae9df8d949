//! Owner-thread and async task scheduling

pub mod host;
pub mod task;
mod owner;
pub mod task_scheduler;

pub use host::{HostCapability, OwnerKey, RegionCoord};
pub use task::{SchedulerStats, TaskError, TaskHandle, TaskKind, TaskResult};
pub use task_scheduler::{Reply, TaskScheduler};
