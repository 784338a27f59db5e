use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// 队列与锁的存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// 单进程内存实现
    #[default]
    Memory,
    Redis,
}

/// 队列配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Worker崩溃后作业重新可见前的时间
    pub visibility_timeout_seconds: u64,
    /// 出队轮询间隔
    pub poll_interval_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            visibility_timeout_seconds: 60,
            poll_interval_ms: 250,
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.visibility_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("可见性超时必须大于0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }
        self.retry.validate()
    }
}

/// Redis连接配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// 所有键的前缀，多个部署共享同一个Redis时用来隔离
    pub key_prefix: String,
    pub connect_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            key_prefix: "jobq".to_string(),
            connect_retries: 3,
            retry_delay_ms: 1_000,
        }
    }
}

impl RedisConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.url.is_empty() {
            return Err(anyhow::anyhow!("Redis连接URL不能为空"));
        }
        if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
            return Err(anyhow::anyhow!(
                "Redis URL格式无效，必须以redis://或rediss://开头: {}",
                self.url
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(anyhow::anyhow!("Redis键前缀不能为空"));
        }
        Ok(())
    }
}
