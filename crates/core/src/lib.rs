//! 定时作业引擎的核心类型
//!
//! 包含CRON解析、任务与作业模型、后端抽象（队列、租约锁、健康记录）、
//! 任务注册表、时钟与身份注入，以及配置和日志初始化。

pub mod clock;
pub mod config;
pub mod cron;
pub mod errors;
pub mod identity;
pub mod logging;
pub mod models;
pub mod registry;
pub mod retry;
pub mod traits;

pub use clock::{add_duration, Clock, ManualClock, SystemClock};
pub use cron::{truncate_to_minute, CronExpression, CronField, CronParseError};
pub use errors::{panic_message, Result, SchedulerError};
pub use identity::OwnerToken;
pub use registry::{RegisteredTask, TaskRegistry};
pub use retry::RetryPolicy;

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
