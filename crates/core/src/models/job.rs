use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskDefinition;
use crate::SchedulerError;

/// 作业状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "IN_FLIGHT")]
    InFlight,
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "DEAD_LETTERED")]
    DeadLettered,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InFlight => "IN_FLIGHT",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::DeadLettered => "DEAD_LETTERED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "IN_FLIGHT" => Ok(JobStatus::InFlight),
            "SUCCEEDED" => Ok(JobStatus::Succeeded),
            "DEAD_LETTERED" => Ok(JobStatus::DeadLettered),
            _ => Err(SchedulerError::Serialization(format!(
                "Invalid job status: {s}"
            ))),
        }
    }
}

/// 作业：任务的一次调度触发或一次临时提交
///
/// `attempts` 只统计失败的尝试次数。因锁竞争而重新排队的作业不计数。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub task_name: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    /// 产生该作业的调度分钟，临时提交的作业为空
    pub scheduled_for: Option<DateTime<Utc>>,
    /// 作业在队列中重新可见的时间（退避延迟）
    pub visible_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(
        task_name: impl Into<String>,
        payload: serde_json::Value,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_name: task_name.into(),
            payload,
            attempts: 0,
            max_attempts,
            status: JobStatus::Pending,
            created_at: now,
            scheduled_for: None,
            visible_at: now,
            last_attempt_at: None,
            last_error: None,
        }
    }

    /// 按任务定义创建作业，继承任务的默认参数和最大尝试次数
    pub fn for_task(task: &TaskDefinition, now: DateTime<Utc>) -> Self {
        Self::new(
            task.name.clone(),
            task.default_payload.clone(),
            task.max_attempts,
            now,
        )
    }

    pub fn with_scheduled_for(mut self, slot: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(slot);
        self
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// 记录一次失败，返回是否已耗尽尝试次数
    pub fn record_failure(&mut self, error: &str) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.is_exhausted()
    }

    /// 管理性取消：直接耗尽尝试次数
    pub fn force_exhausted(&mut self, reason: &str) {
        self.attempts = self.max_attempts;
        self.last_error = Some(reason.to_string());
        self.status = JobStatus::DeadLettered;
    }
}

/// 传给任务处理器的执行上下文
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub task_name: String,
    /// 本次是第几次尝试，从1开始
    pub attempt: u32,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
}

impl From<&Job> for JobContext {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            task_name: job.task_name.clone(),
            attempt: job.attempts + 1,
            scheduled_for: job.scheduled_for,
            payload: job.payload.clone(),
        }
    }
}

/// 队列中各区域的作业数量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// 立即可被取出的作业
    pub ready: usize,
    /// 处于退避延迟中的作业
    pub delayed: usize,
    pub in_flight: usize,
    pub dead_lettered: usize,
}
