use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use jobq_core::models::HealthRecord;
use jobq_core::traits::HealthStore;
use jobq_core::SchedulerResult;

/// 单进程健康记录存储
#[derive(Debug, Default)]
pub struct InMemoryHealthStore {
    records: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryHealthStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealthStore for InMemoryHealthStore {
    async fn record_success(&self, task_name: &str, at: DateTime<Utc>) -> SchedulerResult<()> {
        let mut records = self.records.write().await;
        let entry = records.entry(task_name.to_string()).or_insert(at);
        if *entry < at {
            *entry = at;
        }
        Ok(())
    }

    async fn last_success(&self, task_name: &str) -> SchedulerResult<Option<DateTime<Utc>>> {
        Ok(self.records.read().await.get(task_name).copied())
    }

    async fn records(&self) -> SchedulerResult<Vec<HealthRecord>> {
        let records = self.records.read().await;
        let mut result: Vec<HealthRecord> = records
            .iter()
            .map(|(task_name, last_success_at)| HealthRecord {
                task_name: task_name.clone(),
                last_success_at: *last_success_at,
            })
            .collect();
        result.sort_by(|a, b| a.task_name.cmp(&b.task_name));
        Ok(result)
    }
}
