//! 作业执行：Worker池、执行锁与心跳、内置处理器

pub mod components;
pub mod handlers;
pub mod pool;

pub use components::{ExecutionLease, ExecutorSettings, HeartbeatManager, JobExecutor, JobOutcome};
pub use handlers::{builtin_handler, ShellHandler, ShellTaskParams};
pub use pool::WorkerPool;
