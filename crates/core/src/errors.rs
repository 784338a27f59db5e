use thiserror::Error;

use crate::cron::CronParseError;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("无效的CRON表达式: {expr} - {source}")]
    InvalidCron {
        expr: String,
        #[source]
        source: CronParseError,
    },

    #[error("无效的任务定义 {name}: {message}")]
    InvalidTask { name: String, message: String },

    #[error("任务已注册: {name}")]
    DuplicateTask { name: String },

    #[error("任务未找到: {name}")]
    TaskNotFound { name: String },

    #[error("作业未找到或不在执行中: {id}")]
    JobNotFound { id: String },

    #[error("存储后端错误: {0}")]
    Backend(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("任务执行超时: {seconds}秒")]
    ExecutionTimeout { seconds: u64 },

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 是否属于注册阶段的配置错误
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidCron { .. }
                | SchedulerError::InvalidTask { .. }
                | SchedulerError::DuplicateTask { .. }
                | SchedulerError::Configuration(_)
        )
    }

    /// 后端不可用一类的瞬时错误，调用方应在下一轮循环重试
    pub fn is_backend(&self) -> bool {
        matches!(self, SchedulerError::Backend(_))
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// 从panic负载中取出消息文本
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
