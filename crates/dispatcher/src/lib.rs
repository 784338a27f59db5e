//! 调度器tick循环与运行健康监控

pub mod health_monitor;
pub mod scheduler;

pub use health_monitor::HealthMonitor;
pub use scheduler::{dedup_key, TaskScheduler, TickSummary};
