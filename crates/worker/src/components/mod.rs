pub mod heartbeat_manager;
pub mod task_execution;

pub use heartbeat_manager::{ExecutionLease, HeartbeatManager};
pub use task_execution::{ExecutorSettings, JobExecutor, JobOutcome};
