//! Redis后端
//!
//! 键布局（`{p}` 为配置的前缀）：
//!
//! | 键 | 类型 | 内容 |
//! |----|------|------|
//! | `{p}:job:{id}` | HASH | 作业字段，时间为毫秒时间戳 |
//! | `{p}:ready` | LIST | 待处理作业ID，LPUSH入队、RPOP出队 |
//! | `{p}:delayed` | ZSET | 退避中的作业ID，分数为可见时间 |
//! | `{p}:inflight` | ZSET | 执行中的作业ID，分数为可见性截止时间 |
//! | `{p}:dead` | LIST | 死信作业ID，最早的在前 |
//! | `{p}:lock:{key}` | STRING | 锁持有者，带PX过期 |
//! | `{p}:health` | HASH | 任务名到最近成功时间 |
//!
//! 每次状态变更是一段Lua脚本或一个MULTI事务。

mod codec;
pub mod connection;
pub mod health;
pub mod lock;
pub mod queue;

pub use connection::connect;
pub use health::RedisHealthStore;
pub use lock::RedisLockStore;
pub use queue::RedisJobQueue;

use jobq_core::SchedulerError;

/// 键名生成
#[derive(Debug, Clone)]
pub struct RedisKeys {
    prefix: String,
}

impl RedisKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn job_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    pub fn job(&self, id: &str) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    pub fn ready(&self) -> String {
        format!("{}:ready", self.prefix)
    }

    pub fn delayed(&self) -> String {
        format!("{}:delayed", self.prefix)
    }

    pub fn inflight(&self) -> String {
        format!("{}:inflight", self.prefix)
    }

    pub fn dead(&self) -> String {
        format!("{}:dead", self.prefix)
    }

    pub fn lock(&self, key: &str) -> String {
        format!("{}:lock:{}", self.prefix, key)
    }

    pub fn health(&self) -> String {
        format!("{}:health", self.prefix)
    }
}

pub(crate) fn backend_error(operation: &str, err: redis::RedisError) -> SchedulerError {
    metrics::counter!("jobq_redis_errors_total").increment(1);
    SchedulerError::Backend(format!("Redis {operation} failed: {err}"))
}

pub(crate) fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
