use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// tick间隔，不能粗于CRON的最小粒度（一分钟）
    pub tick_interval_seconds: u64,
    /// 覆盖自动生成的持有者标识
    pub instance_id: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 15,
            instance_id: None,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=60).contains(&self.tick_interval_seconds) {
            return Err(anyhow::anyhow!(
                "调度间隔必须在1到60秒之间: {}",
                self.tick_interval_seconds
            ));
        }
        if matches!(&self.instance_id, Some(id) if id.trim().is_empty()) {
            return Err(anyhow::anyhow!("调度器实例ID不能为空字符串"));
        }
        Ok(())
    }
}

/// Worker池配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub dequeue_timeout_ms: u64,
    pub execution_timeout_seconds: u64,
    /// 执行锁竞争时作业重新可见前的等待
    pub contention_retry_delay_ms: u64,
    pub heartbeat_interval_seconds: u64,
    /// 后端出错后下一轮循环前的等待
    pub error_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            dequeue_timeout_ms: 1_000,
            execution_timeout_seconds: 300,
            contention_retry_delay_ms: 5_000,
            heartbeat_interval_seconds: 10,
            error_backoff_ms: 1_000,
        }
    }
}

impl WorkerConfig {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_seconds)
    }

    pub fn contention_retry_delay(&self) -> Duration {
        Duration::from_millis(self.contention_retry_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrency == 0 {
            return Err(anyhow::anyhow!("Worker并发数必须大于0"));
        }
        if self.dequeue_timeout_ms == 0 {
            return Err(anyhow::anyhow!("出队等待时间必须大于0"));
        }
        if self.execution_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("执行超时时间必须大于0"));
        }
        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }
        Ok(())
    }
}
