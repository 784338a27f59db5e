use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::HealthRecord;
use crate::Result;

/// 每个任务最近一次成功执行时间的存储
#[async_trait]
pub trait HealthStore: Send + Sync {
    /// 记录一次成功，较旧的时间不会覆盖较新的记录
    async fn record_success(&self, task_name: &str, at: DateTime<Utc>) -> Result<()>;

    async fn last_success(&self, task_name: &str) -> Result<Option<DateTime<Utc>>>;

    async fn records(&self) -> Result<Vec<HealthRecord>>;
}
