use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    queue_redis::{QueueConfig, RedisConfig},
    scheduler_worker::{SchedulerConfig, WorkerConfig},
    task::TaskConfig,
};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "JOBQ";

const DEFAULT_CONFIG_PATHS: [&str; 3] = ["config/jobq.toml", "jobq.toml", "/etc/jobq/config.toml"];

/// 系统配置
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub redis: RedisConfig,
    pub api: ApiConfig,
    pub observability: ObservabilityConfig,
    pub tasks: Vec<TaskConfig>,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// # 参数
    ///
    /// * `config_path` - 配置文件路径，为 None 时依次尝试默认路径
    ///
    /// # 返回值
    ///
    /// 加载并验证后的配置
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        // 环境变量优先级最高
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    /// 序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 验证整个配置树
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.queue.validate().context("队列配置验证失败")?;
        self.redis.validate().context("Redis配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        if self.worker.heartbeat_interval_seconds >= self.queue.visibility_timeout_seconds {
            return Err(anyhow::anyhow!(
                "心跳间隔 {}s 必须小于可见性超时 {}s",
                self.worker.heartbeat_interval_seconds,
                self.queue.visibility_timeout_seconds
            ));
        }

        let mut names = HashSet::new();
        for task in &self.tasks {
            task.validate()
                .with_context(|| format!("任务 {} 配置验证失败", task.name))?;
            if !names.insert(task.name.as_str()) {
                return Err(anyhow::anyhow!("任务名称重复: {}", task.name));
            }
            if task.lock_ttl_seconds > 0
                && task.lock_ttl_seconds <= self.worker.heartbeat_interval_seconds
            {
                return Err(anyhow::anyhow!(
                    "任务 {} 的执行锁租期 {}s 必须大于心跳间隔 {}s",
                    task.name,
                    task.lock_ttl_seconds,
                    self.worker.heartbeat_interval_seconds
                ));
            }
        }
        Ok(())
    }
}
