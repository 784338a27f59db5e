use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cron::CronExpression;
use crate::{SchedulerError, SchedulerResult};

/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 自定义调度谓词
pub type SchedulePredicate = Arc<dyn Fn(DateTime<Utc>) -> bool + Send + Sync>;

/// 任务的调度规则
#[derive(Clone)]
pub enum Schedule {
    /// 五字段CRON表达式
    Cron(CronExpression),
    /// 自定义 `should_run(now)` 谓词
    Predicate(SchedulePredicate),
    /// 从不自动调度，只接受临时提交
    Manual,
}

impl Schedule {
    /// 当前时刻是否应该触发
    ///
    /// 谓词可能panic，调用方负责隔离。
    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        match self {
            Schedule::Cron(expr) => expr.matches(now),
            Schedule::Predicate(predicate) => predicate(now),
            Schedule::Manual => false,
        }
    }

    /// 下一次执行时间，只有CRON调度可以计算
    pub fn next_run(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(expr) => expr.next_run(from),
            Schedule::Predicate(_) | Schedule::Manual => None,
        }
    }
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Cron(expr) => f.debug_tuple("Cron").field(&expr.as_str()).finish(),
            Schedule::Predicate(_) => f.write_str("Predicate(..)"),
            Schedule::Manual => f.write_str("Manual"),
        }
    }
}

/// 任务定义
///
/// # 字段说明
///
/// - `name`: 任务的唯一名称，作业通过它找到处理器
/// - `schedule`: 调度规则
/// - `max_attempts`: 进入死信队列前允许的失败次数
/// - `lock_ttl`: 执行锁租期，为零表示不加锁；任务运行时间可能超过调度周期时必须设置
/// - `expected_interval`: 健康检查的期望成功间隔，为零表示不检查
/// - `timeout`: 单次执行超时，未设置时使用Worker配置
/// - `default_payload`: 调度产生的作业携带的参数
///
/// # 使用示例
///
/// ```rust
/// use std::time::Duration;
/// use jobq_core::models::TaskDefinition;
///
/// let task = TaskDefinition::cron("cleanup", "0 3 * * *")
///     .unwrap()
///     .with_max_attempts(5)
///     .with_lock_ttl(Duration::from_secs(600))
///     .with_expected_interval(Duration::from_secs(26 * 3600));
/// assert_eq!(task.max_attempts, 5);
/// ```
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: String,
    pub schedule: Schedule,
    pub max_attempts: u32,
    pub lock_ttl: Duration,
    pub expected_interval: Duration,
    pub timeout: Option<Duration>,
    pub default_payload: serde_json::Value,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            name: name.into(),
            schedule,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lock_ttl: Duration::ZERO,
            expected_interval: Duration::ZERO,
            timeout: None,
            default_payload: serde_json::Value::Null,
        }
    }

    /// 按CRON表达式调度的任务，表达式无效时立即失败
    pub fn cron(name: impl Into<String>, expr: &str) -> SchedulerResult<Self> {
        Ok(Self::new(name, Schedule::Cron(CronExpression::new(expr)?)))
    }

    pub fn predicate<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(DateTime<Utc>) -> bool + Send + Sync + 'static,
    {
        Self::new(name, Schedule::Predicate(Arc::new(predicate)))
    }

    pub fn manual(name: impl Into<String>) -> Self {
        Self::new(name, Schedule::Manual)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// 设置执行锁租期
    ///
    /// 租期必须大于Worker的心跳间隔，
    /// 否则租约会在第一次续租前过期，另一个Worker可能同时执行该任务。
    pub fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }

    pub fn with_expected_interval(mut self, expected_interval: Duration) -> Self {
        self.expected_interval = expected_interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.default_payload = payload;
        self
    }

    pub fn requires_lock(&self) -> bool {
        !self.lock_ttl.is_zero()
    }

    /// 注册前的校验
    pub fn validate(&self) -> SchedulerResult<()> {
        let invalid = |message: &str| SchedulerError::InvalidTask {
            name: self.name.clone(),
            message: message.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("任务名称不能为空"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("最大尝试次数必须大于0"));
        }
        if matches!(self.timeout, Some(timeout) if timeout.is_zero()) {
            return Err(invalid("执行超时必须大于0"));
        }
        Ok(())
    }
}
