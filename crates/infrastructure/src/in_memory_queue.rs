use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use jobq_core::models::{Job, JobStatus, QueueStats};
use jobq_core::traits::JobQueue;
use jobq_core::{add_duration, Clock, RetryPolicy, SchedulerError, SchedulerResult};

/// 可见性超时被回收时记录的错误
pub const VISIBILITY_TIMEOUT_ERROR: &str = "visibility timeout expired";

/// 内存作业队列配置
#[derive(Debug, Clone)]
pub struct InMemoryQueueConfig {
    /// 执行中作业在没有心跳时重新可见前的时间
    pub visibility_timeout: Duration,
    /// 等待作业时重新检查延迟区域的间隔
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for InMemoryQueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug)]
struct InFlight {
    job: Job,
    deadline: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Job>,
    /// 按进入顺序保存，提升时按 `visible_at` 稳定排序
    delayed: Vec<Job>,
    in_flight: HashMap<String, InFlight>,
    dead: Vec<Job>,
}

impl QueueState {
    /// 回收超时的执行中作业，并把到期的延迟作业移到待处理区域末尾
    fn promote(&mut self, now: DateTime<Utc>) -> bool {
        let mut became_ready = false;

        let mut expired: Vec<(DateTime<Utc>, String)> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, entry)| (entry.deadline, id.clone()))
            .collect();
        expired.sort();
        for (_, id) in expired {
            let Some(InFlight { mut job, .. }) = self.in_flight.remove(&id) else {
                continue;
            };
            metrics::counter!("jobq_jobs_visibility_expired_total").increment(1);
            if job.record_failure(VISIBILITY_TIMEOUT_ERROR) {
                warn!(job_id = %job.id, task = %job.task_name, attempts = job.attempts, "作业可见性超时，尝试次数耗尽，移入死信队列");
                job.status = JobStatus::DeadLettered;
                self.dead.push(job);
            } else {
                warn!(job_id = %job.id, task = %job.task_name, attempts = job.attempts, "作业可见性超时，重新排队");
                job.status = JobStatus::Pending;
                job.visible_at = now;
                self.ready.push_back(job);
                became_ready = true;
            }
        }

        if self.delayed.iter().any(|job| job.visible_at <= now) {
            let (mut due, pending): (Vec<Job>, Vec<Job>) = std::mem::take(&mut self.delayed)
                .into_iter()
                .partition(|job| job.visible_at <= now);
            self.delayed = pending;
            due.sort_by_key(|job| job.visible_at);
            self.ready.extend(due);
            became_ready = true;
        }

        became_ready
    }

    fn place(&mut self, mut job: Job, now: DateTime<Utc>) -> bool {
        job.status = JobStatus::Pending;
        if job.visible_at > now {
            self.delayed.push(job);
            false
        } else {
            self.ready.push_back(job);
            true
        }
    }

    fn take_in_flight(&mut self, job_id: &str) -> SchedulerResult<Job> {
        self.in_flight
            .remove(job_id)
            .map(|entry| entry.job)
            .ok_or_else(|| SchedulerError::JobNotFound {
                id: job_id.to_string(),
            })
    }

    /// 从任意非死信区域取出作业
    fn take_anywhere(&mut self, job_id: &str) -> Option<Job> {
        if let Some(pos) = self.ready.iter().position(|job| job.id == job_id) {
            return self.ready.remove(pos);
        }
        if let Some(pos) = self.delayed.iter().position(|job| job.id == job_id) {
            return Some(self.delayed.remove(pos));
        }
        self.in_flight.remove(job_id).map(|entry| entry.job)
    }
}

/// 单进程内存作业队列
///
/// 所有操作在一把互斥锁下串行执行；时间从注入的时钟读取，因此延迟作业的提升和
/// 可见性超时都可以在测试中用 `ManualClock` 驱动。
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    clock: Arc<dyn Clock>,
    config: InMemoryQueueConfig,
}

impl InMemoryJobQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, InMemoryQueueConfig::default())
    }

    pub fn with_config(clock: Arc<dyn Clock>, config: InMemoryQueueConfig) -> Self {
        info!(
            visibility_timeout_ms = config.visibility_timeout.as_millis() as u64,
            "创建内存作业队列"
        );
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            clock,
            config,
        }
    }

    async fn try_claim(&self) -> Option<Job> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.promote(now);
        let mut job = state.ready.pop_front()?;
        job.status = JobStatus::InFlight;
        job.last_attempt_at = Some(now);
        let deadline = add_duration(now, self.config.visibility_timeout);
        state.in_flight.insert(
            job.id.clone(),
            InFlight {
                job: job.clone(),
                deadline,
            },
        );
        Some(job)
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> SchedulerResult<()> {
        let now = self.clock.now();
        debug!(job_id = %job.id, task = %job.task_name, "作业入队");
        let ready = self.state.lock().await.place(job, now);
        if ready {
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> SchedulerResult<Option<Job>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(job) = self.try_claim().await {
                debug!(job_id = %job.id, task = %job.task_name, "作业出队");
                return Ok(Some(job));
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let wait = remaining.min(self.config.poll_interval);
            let _ = tokio::time::timeout(wait, self.notify.notified()).await;
        }
    }

    async fn ack(&self, job_id: &str) -> SchedulerResult<()> {
        let job = self.state.lock().await.take_in_flight(job_id)?;
        debug!(job_id = %job.id, task = %job.task_name, "作业确认完成");
        Ok(())
    }

    async fn nack(&self, job_id: &str, error: &str) -> SchedulerResult<Job> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut job = state.take_in_flight(job_id)?;

        if job.record_failure(error) {
            job.status = JobStatus::DeadLettered;
            state.dead.push(job.clone());
            return Ok(job);
        }

        job.visible_at = add_duration(now, self.config.retry.delay_for(job.attempts));
        let ready = state.place(job.clone(), now);
        drop(state);
        if ready {
            self.notify.notify_one();
        }
        job.status = JobStatus::Pending;
        Ok(job)
    }

    async fn release(&self, job_id: &str, delay: Duration) -> SchedulerResult<()> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let mut job = state.take_in_flight(job_id)?;
        job.visible_at = add_duration(now, delay);
        let ready = state.place(job, now);
        drop(state);
        if ready {
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn touch(&self, job_id: &str) -> SchedulerResult<()> {
        let deadline = add_duration(self.clock.now(), self.config.visibility_timeout);
        let mut state = self.state.lock().await;
        let entry = state
            .in_flight
            .get_mut(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound {
                id: job_id.to_string(),
            })?;
        entry.deadline = deadline;
        Ok(())
    }

    async fn dead_letter(&self, job_id: &str, reason: &str) -> SchedulerResult<Job> {
        let mut state = self.state.lock().await;
        let mut job = state
            .take_anywhere(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound {
                id: job_id.to_string(),
            })?;
        job.force_exhausted(reason);
        info!(job_id = %job.id, task = %job.task_name, reason, "作业被手动移入死信队列");
        state.dead.push(job.clone());
        Ok(job)
    }

    async fn dead_letters(&self) -> SchedulerResult<Vec<Job>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.promote(now);
        Ok(state.dead.clone())
    }

    async fn replay_dead_letter(&self, job_id: &str) -> SchedulerResult<Job> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let pos = state
            .dead
            .iter()
            .position(|job| job.id == job_id)
            .ok_or_else(|| SchedulerError::JobNotFound {
                id: job_id.to_string(),
            })?;
        let mut job = state.dead.remove(pos);
        job.attempts = 0;
        job.visible_at = now;
        job.status = JobStatus::Pending;
        state.ready.push_back(job.clone());
        drop(state);

        info!(job_id = %job.id, task = %job.task_name, "重放死信作业");
        self.notify.notify_one();
        Ok(job)
    }

    async fn stats(&self) -> SchedulerResult<QueueStats> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if state.promote(now) {
            self.notify.notify_one();
        }
        Ok(QueueStats {
            ready: state.ready.len(),
            delayed: state.delayed.len(),
            in_flight: state.in_flight.len(),
            dead_lettered: state.dead.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobq_core::ManualClock;

    const SHORT: Duration = Duration::from_millis(20);

    fn setup(retry: RetryPolicy) -> (ManualClock, InMemoryJobQueue) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap());
        let queue = InMemoryJobQueue::with_config(
            Arc::new(clock.clone()),
            InMemoryQueueConfig {
                visibility_timeout: Duration::from_secs(60),
                poll_interval: Duration::from_millis(5),
                retry,
            },
        );
        (clock, queue)
    }

    fn job(clock: &ManualClock, task: &str, max_attempts: u32) -> Job {
        Job::new(task, serde_json::Value::Null, max_attempts, clock.now())
    }

    #[tokio::test]
    async fn test_fifo_for_same_task() {
        let (clock, queue) = setup(RetryPolicy::default());
        let jobs: Vec<Job> = (0..3).map(|_| job(&clock, "reports", 3)).collect();
        for job in &jobs {
            queue.enqueue(job.clone()).await.unwrap();
        }
        for expected in &jobs {
            let got = queue.dequeue(SHORT).await.unwrap().unwrap();
            assert_eq!(got.id, expected.id);
            assert_eq!(got.status, JobStatus::InFlight);
        }
        assert!(queue.dequeue(SHORT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let (_clock, queue) = setup(RetryPolicy::default());
        let started = tokio::time::Instant::now();
        assert!(queue.dequeue(Duration::from_millis(30)).await.unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let (clock, queue) = setup(RetryPolicy::default());
        let queue = Arc::new(queue);
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let pending = job(&clock, "reports", 3);
        queue.enqueue(pending.clone()).await.unwrap();
        let got = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(got.id, pending.id);
    }

    #[tokio::test]
    async fn test_nack_backs_off_then_dead_letters() {
        let (clock, queue) = setup(RetryPolicy::default());
        let original = job(&clock, "reports", 2);
        queue.enqueue(original.clone()).await.unwrap();

        let first = queue.dequeue(SHORT).await.unwrap().unwrap();
        let retried = queue.nack(&first.id, "boom 1").await.unwrap();
        assert_eq!(retried.attempts, 1);
        assert_eq!(retried.status, JobStatus::Pending);

        // 退避期间不可见
        assert!(queue.dequeue(SHORT).await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap().delayed, 1);

        clock.advance(chrono::Duration::seconds(1));
        let second = queue.dequeue(SHORT).await.unwrap().unwrap();
        assert_eq!(second.attempts, 1);
        let dead = queue.nack(&second.id, "boom 2").await.unwrap();
        assert_eq!(dead.status, JobStatus::DeadLettered);
        assert_eq!(dead.attempts, 2);

        let dead_letters = queue.dead_letters().await.unwrap();
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].last_error.as_deref(), Some("boom 2"));
    }

    #[tokio::test]
    async fn test_ack_removes_job_permanently() {
        let (clock, queue) = setup(RetryPolicy::default());
        queue.enqueue(job(&clock, "reports", 3)).await.unwrap();
        let got = queue.dequeue(SHORT).await.unwrap().unwrap();
        queue.ack(&got.id).await.unwrap();

        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
        assert!(matches!(
            queue.ack(&got.id).await,
            Err(SchedulerError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_release_does_not_count_attempt() {
        let (clock, queue) = setup(RetryPolicy::default());
        queue.enqueue(job(&clock, "reports", 1)).await.unwrap();
        let got = queue.dequeue(SHORT).await.unwrap().unwrap();
        queue.release(&got.id, Duration::from_secs(5)).await.unwrap();
        assert!(queue.dequeue(SHORT).await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(5));
        let again = queue.dequeue(SHORT).await.unwrap().unwrap();
        assert_eq!(again.id, got.id);
        assert_eq!(again.attempts, 0);
    }

    #[tokio::test]
    async fn test_visibility_timeout_redelivers_and_counts() {
        let (clock, queue) = setup(RetryPolicy::default());
        queue.enqueue(job(&clock, "reports", 3)).await.unwrap();
        let got = queue.dequeue(SHORT).await.unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(30));
        queue.touch(&got.id).await.unwrap();
        clock.advance(chrono::Duration::seconds(59));
        assert!(queue.dequeue(SHORT).await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(1));
        let redelivered = queue.dequeue(SHORT).await.unwrap().unwrap();
        assert_eq!(redelivered.id, got.id);
        assert_eq!(redelivered.attempts, 1);
        assert_eq!(
            redelivered.last_error.as_deref(),
            Some(VISIBILITY_TIMEOUT_ERROR)
        );
        // 旧持有者的确认失败
        assert!(queue.touch("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_administrative_dead_letter_and_replay() {
        let (clock, queue) = setup(RetryPolicy::default());
        let pending = job(&clock, "reports", 5);
        queue.enqueue(pending.clone()).await.unwrap();

        let dead = queue.dead_letter(&pending.id, "cancelled").await.unwrap();
        assert_eq!(dead.attempts, 5);
        assert_eq!(queue.stats().await.unwrap().dead_lettered, 1);

        let replayed = queue.replay_dead_letter(&pending.id).await.unwrap();
        assert_eq!(replayed.attempts, 0);
        let got = queue.dequeue(SHORT).await.unwrap().unwrap();
        assert_eq!(got.id, pending.id);
        assert!(queue.replay_dead_letter(&pending.id).await.is_err());
    }

    #[tokio::test]
    async fn test_future_job_waits_in_delayed_region() {
        let (clock, queue) = setup(RetryPolicy::default());
        let mut future = job(&clock, "reports", 3);
        future.visible_at = clock.now() + chrono::Duration::minutes(5);
        queue.enqueue(future.clone()).await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!((stats.ready, stats.delayed), (0, 1));
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(queue.dequeue(SHORT).await.unwrap().unwrap().id, future.id);
    }
}
