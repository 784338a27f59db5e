use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use jobq_core::models::{Job, Schedule};
use jobq_core::traits::{JobQueue, TaskLock};
use jobq_core::{
    panic_message, truncate_to_minute, Clock, OwnerToken, RegisteredTask, SchedulerError,
    SchedulerResult, TaskRegistry,
};

/// 入队去重锁的最短持有时间，覆盖整个调度分钟
const MIN_DEDUP_TTL: Duration = Duration::from_secs(60);

/// 一次tick的结果
#[derive(Debug, Default)]
pub struct TickSummary {
    /// 本次入队的作业
    pub enqueued: Vec<Job>,
    /// 评估或入队失败的任务
    pub failed: Vec<String>,
}

/// 调度器
///
/// 按固定节奏tick，对每个已注册任务评估调度规则；到期时先获取以
/// `schedule:{task}:{分钟}` 为键的去重锁，获取成功才入队，保证多个调度器实例
/// 在同一分钟内只有一个为该任务入队。去重锁不主动释放，到期自然失效。
pub struct TaskScheduler {
    registry: Arc<TaskRegistry>,
    queue: Arc<dyn JobQueue>,
    lock: Arc<dyn TaskLock>,
    clock: Arc<dyn Clock>,
    owner: OwnerToken,
    tick_interval: Duration,
    /// 每个任务本实例最近处理过的调度分钟
    last_fired: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl TaskScheduler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        queue: Arc<dyn JobQueue>,
        lock: Arc<dyn TaskLock>,
        clock: Arc<dyn Clock>,
        owner: OwnerToken,
        tick_interval: Duration,
    ) -> Self {
        Self {
            registry,
            queue,
            lock,
            clock,
            owner,
            tick_interval,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    pub fn owner(&self) -> &OwnerToken {
        &self.owner
    }

    /// 运行tick循环直到收到关闭信号
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            owner = %self.owner,
            tick_interval_seconds = self.tick_interval.as_secs(),
            "调度器启动"
        );
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let summary = self.tick().await;
                    if !summary.enqueued.is_empty() || !summary.failed.is_empty() {
                        debug!(
                            enqueued = summary.enqueued.len(),
                            failed = summary.failed.len(),
                            "tick完成"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!("调度器收到关闭信号，停止调度");
                    break;
                }
            }
        }
    }

    /// 评估所有任务一次
    ///
    /// 单个任务的失败（包括谓词panic和后端错误）只记录日志，不影响其他任务。
    pub async fn tick(&self) -> TickSummary {
        let now = self.clock.now();
        let slot = truncate_to_minute(now);
        let mut summary = TickSummary::default();

        for task in self.registry.snapshot().await {
            match self.evaluate(&task, now, slot).await {
                Ok(Some(job)) => summary.enqueued.push(job),
                Ok(None) => {}
                Err(e) => {
                    error!(task = %task.name(), error = %e, "调度任务失败");
                    metrics::counter!("jobq_scheduler_tick_errors_total", "task" => task.name().to_string())
                        .increment(1);
                    summary.failed.push(task.name().to_string());
                }
            }
        }
        summary
    }

    async fn evaluate(
        &self,
        task: &RegisteredTask,
        now: DateTime<Utc>,
        slot: DateTime<Utc>,
    ) -> SchedulerResult<Option<Job>> {
        let definition = &task.definition;
        if matches!(definition.schedule, Schedule::Manual) {
            return Ok(None);
        }
        if self.last_fired.lock().await.get(&definition.name) == Some(&slot) {
            return Ok(None);
        }

        let due = catch_unwind(AssertUnwindSafe(|| definition.schedule.should_run(now)))
            .map_err(|panic| {
                SchedulerError::Internal(format!("调度谓词panic: {}", panic_message(&*panic)))
            })?;
        if !due {
            return Ok(None);
        }

        let key = dedup_key(&definition.name, slot);
        let ttl = self.tick_interval.max(MIN_DEDUP_TTL);
        if !self.lock.try_acquire(&key, self.owner.as_str(), ttl).await? {
            debug!(task = %definition.name, %slot, "其他调度器实例已为本分钟入队");
            self.mark_fired(&definition.name, slot).await;
            return Ok(None);
        }

        let job = Job::for_task(definition, now).with_scheduled_for(slot);
        if let Err(e) = self.queue.enqueue(job.clone()).await {
            // 释放去重锁，让下一次tick重试
            if let Err(release_err) = self.lock.release(&key, self.owner.as_str()).await {
                warn!(task = %definition.name, error = %release_err, "释放去重锁失败");
            }
            return Err(e);
        }

        self.mark_fired(&definition.name, slot).await;
        metrics::counter!("jobq_jobs_enqueued_total", "task" => definition.name.clone())
            .increment(1);
        info!(task = %definition.name, job_id = %job.id, %slot, "调度作业已入队");
        Ok(Some(job))
    }

    async fn mark_fired(&self, task_name: &str, slot: DateTime<Utc>) {
        self.last_fired
            .lock()
            .await
            .insert(task_name.to_string(), slot);
    }

    /// 为已注册任务临时提交一个作业，未提供参数时使用任务的默认参数
    pub async fn submit(
        &self,
        task_name: &str,
        payload: Option<serde_json::Value>,
    ) -> SchedulerResult<Job> {
        let task = self
            .registry
            .get(task_name)
            .await
            .ok_or_else(|| SchedulerError::TaskNotFound {
                name: task_name.to_string(),
            })?;

        let mut job = Job::for_task(&task.definition, self.clock.now());
        if let Some(payload) = payload {
            job.payload = payload;
        }
        self.queue.enqueue(job.clone()).await?;
        metrics::counter!("jobq_jobs_enqueued_total", "task" => task_name.to_string())
            .increment(1);
        info!(task = task_name, job_id = %job.id, "临时作业已提交");
        Ok(job)
    }

    /// 任务的下一次CRON执行时间，非CRON调度返回 `None`
    pub async fn next_run(&self, task_name: &str) -> SchedulerResult<Option<DateTime<Utc>>> {
        let task = self
            .registry
            .get(task_name)
            .await
            .ok_or_else(|| SchedulerError::TaskNotFound {
                name: task_name.to_string(),
            })?;
        Ok(task.definition.schedule.next_run(self.clock.now()))
    }
}

/// 入队去重锁的键
pub fn dedup_key(task_name: &str, slot: DateTime<Utc>) -> String {
    format!("schedule:{}:{}", task_name, slot.timestamp() / 60)
}
