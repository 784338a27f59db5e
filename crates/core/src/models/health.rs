use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务最近一次成功执行的记录，只在作业成功时更新
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub task_name: String,
    pub last_success_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// 健康检查结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// 逾期任务名称，按名称排序
    pub overdue: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn from_overdue(mut overdue: Vec<String>, checked_at: DateTime<Utc>) -> Self {
        overdue.sort();
        let status = if overdue.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        Self {
            status,
            overdue,
            checked_at,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
