use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{Schedule, TaskDefinition, DEFAULT_MAX_ATTEMPTS};
use crate::SchedulerResult;

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// 配置文件中声明的任务
///
/// ```toml
/// [[tasks]]
/// name = "cleanup"
/// schedule = "0 3 * * *"
/// handler = "shell"
/// payload = { command = "find", args = ["/tmp", "-mtime", "+7", "-delete"] }
/// lock_ttl_seconds = 600
/// expected_interval_seconds = 93600
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    pub name: String,
    /// CRON表达式，缺省表示只接受临时提交
    #[serde(default)]
    pub schedule: Option<String>,
    /// 处理器名称，内置 `shell`
    pub handler: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub lock_ttl_seconds: u64,
    #[serde(default)]
    pub expected_interval_seconds: u64,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl TaskConfig {
    /// 转换为任务定义，CRON表达式在这里解析
    pub fn to_definition(&self) -> SchedulerResult<TaskDefinition> {
        let mut definition = match &self.schedule {
            Some(expr) => TaskDefinition::cron(self.name.clone(), expr)?,
            None => TaskDefinition::new(self.name.clone(), Schedule::Manual),
        }
        .with_max_attempts(self.max_attempts)
        .with_lock_ttl(Duration::from_secs(self.lock_ttl_seconds))
        .with_expected_interval(Duration::from_secs(self.expected_interval_seconds))
        .with_payload(self.payload.clone());

        if let Some(seconds) = self.timeout_seconds {
            definition = definition.with_timeout(Duration::from_secs(seconds));
        }
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.handler.trim().is_empty() {
            return Err(anyhow::anyhow!("任务 {} 的处理器名称不能为空", self.name));
        }
        self.to_definition()?;
        Ok(())
    }
}
