//! 配置管理
//!
//! 配置按以下顺序叠加，后者覆盖前者：
//!
//! 1. 内置默认值
//! 2. TOML配置文件（`--config` 指定，否则尝试 `config/jobq.toml`、`jobq.toml`）
//! 3. 环境变量（前缀 `JOBQ`，层级分隔符 `__`，例如 `JOBQ_WORKER__CONCURRENCY=8`）

pub mod api_observability;
pub mod app_config;
pub mod queue_redis;
pub mod scheduler_worker;
pub mod task;

pub use api_observability::{ApiConfig, LogFormat, ObservabilityConfig};
pub use app_config::AppConfig;
pub use queue_redis::{QueueBackend, QueueConfig, RedisConfig};
pub use scheduler_worker::{SchedulerConfig, WorkerConfig};
pub use task::TaskConfig;
