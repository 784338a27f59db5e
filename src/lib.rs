//! 定时任务执行引擎的应用装配与进程生命周期

pub mod app;
pub mod shutdown;

pub use app::{register_config_tasks, Application};
pub use shutdown::ShutdownManager;
