use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use jobq_core::models::HealthReport;
use jobq_core::traits::HealthStore;
use jobq_core::{Clock, SchedulerResult, TaskRegistry};

/// 运行健康监控
///
/// 只读聚合：对每个设置了期望间隔的任务，比较最近一次成功时间（没有记录时用进程启动时间）
/// 与当前时间，超过期望间隔即为逾期。结果由外部监控轮询，本身不触发任何动作。
pub struct HealthMonitor {
    registry: Arc<TaskRegistry>,
    health: Arc<dyn HealthStore>,
    clock: Arc<dyn Clock>,
    process_start: DateTime<Utc>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<TaskRegistry>,
        health: Arc<dyn HealthStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let process_start = clock.now();
        Self {
            registry,
            health,
            clock,
            process_start,
        }
    }

    pub fn with_process_start(mut self, process_start: DateTime<Utc>) -> Self {
        self.process_start = process_start;
        self
    }

    pub fn process_start(&self) -> DateTime<Utc> {
        self.process_start
    }

    pub async fn check(&self) -> SchedulerResult<HealthReport> {
        let now = self.clock.now();
        let last_successes: HashMap<String, DateTime<Utc>> = self
            .health
            .records()
            .await?
            .into_iter()
            .map(|record| (record.task_name, record.last_success_at))
            .collect();

        let mut overdue = Vec::new();
        for task in self.registry.snapshot().await {
            let definition = &task.definition;
            if definition.expected_interval.is_zero() {
                continue;
            }
            let Ok(expected) = chrono::Duration::from_std(definition.expected_interval) else {
                continue;
            };
            let reference = last_successes
                .get(&definition.name)
                .copied()
                .unwrap_or(self.process_start);
            if now - reference > expected {
                debug!(
                    task = %definition.name,
                    last_success = %reference,
                    "任务超过期望间隔未成功执行"
                );
                overdue.push(definition.name.clone());
            }
        }

        let report = HealthReport::from_overdue(overdue, now);
        if !report.is_healthy() {
            warn!(overdue = ?report.overdue, "存在逾期任务");
        }
        metrics::gauge!("jobq_overdue_tasks").set(report.overdue.len() as f64);
        Ok(report)
    }
}
