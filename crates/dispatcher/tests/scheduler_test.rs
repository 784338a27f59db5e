use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use jobq_core::models::{Job, QueueStats, TaskDefinition};
use jobq_core::traits::{handler_fn, JobQueue, TaskHandler, TaskLock};
use jobq_core::{Clock, ManualClock, OwnerToken, SchedulerError, SchedulerResult, TaskRegistry};
use jobq_dispatcher::{dedup_key, TaskScheduler};
use jobq_infrastructure::{InMemoryJobQueue, InMemoryLockStore};

const TICK: Duration = Duration::from_secs(15);
const SHORT: Duration = Duration::from_millis(20);

fn three_am() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap()
}

fn noop() -> Arc<dyn TaskHandler> {
    handler_fn(|_ctx| async { Ok(()) })
}

struct Harness {
    clock: ManualClock,
    registry: Arc<TaskRegistry>,
    queue: Arc<InMemoryJobQueue>,
    lock: Arc<InMemoryLockStore>,
}

impl Harness {
    fn new() -> Self {
        let clock = ManualClock::new(three_am());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        Self {
            registry: Arc::new(TaskRegistry::new()),
            queue: Arc::new(InMemoryJobQueue::new(shared.clone())),
            lock: Arc::new(InMemoryLockStore::new(shared)),
            clock,
        }
    }

    fn scheduler(&self, owner: &str) -> TaskScheduler {
        TaskScheduler::new(
            self.registry.clone(),
            self.queue.clone(),
            self.lock.clone(),
            Arc::new(self.clock.clone()),
            OwnerToken::new(owner),
            TICK,
        )
    }
}

#[tokio::test]
async fn test_tick_enqueues_due_cron_task_once_per_minute() {
    let harness = Harness::new();
    harness
        .registry
        .register(TaskDefinition::cron("cleanup", "0 3 * * *").unwrap(), noop())
        .await
        .unwrap();
    let scheduler = harness.scheduler("scheduler-a");

    let summary = scheduler.tick().await;
    assert_eq!(summary.enqueued.len(), 1);
    assert!(summary.failed.is_empty());
    let job = &summary.enqueued[0];
    assert_eq!(job.task_name, "cleanup");
    assert_eq!(job.scheduled_for, Some(three_am()));

    // 同一分钟内的后续tick不再入队
    for _ in 0..3 {
        harness.clock.advance(chrono::Duration::seconds(15));
        assert!(scheduler.tick().await.enqueued.is_empty());
    }

    harness.clock.advance(chrono::Duration::minutes(1));
    assert!(scheduler.tick().await.enqueued.is_empty());

    harness.clock.set(three_am() + chrono::Duration::days(1));
    assert_eq!(scheduler.tick().await.enqueued.len(), 1);
    assert_eq!(harness.queue.stats().await.unwrap().ready, 2);
}

#[tokio::test]
async fn test_two_instances_enqueue_once() {
    let harness = Harness::new();
    harness
        .registry
        .register(TaskDefinition::cron("cleanup", "0 3 * * *").unwrap(), noop())
        .await
        .unwrap();
    let a = Arc::new(harness.scheduler("scheduler-a"));
    let b = Arc::new(harness.scheduler("scheduler-b"));

    let (first, second) = tokio::join!(a.tick(), b.tick());
    assert_eq!(first.enqueued.len() + second.enqueued.len(), 1);

    let lease = harness
        .lock
        .current(&dedup_key("cleanup", three_am()))
        .await
        .unwrap()
        .unwrap();
    assert!(lease.owner == "scheduler-a" || lease.owner == "scheduler-b");
    assert_eq!(harness.queue.stats().await.unwrap().ready, 1);
}

#[tokio::test]
async fn test_panicking_predicate_does_not_halt_tick() {
    let harness = Harness::new();
    harness
        .registry
        .register(
            TaskDefinition::predicate("broken", |_now| panic!("misconfigured")),
            noop(),
        )
        .await
        .unwrap();
    harness
        .registry
        .register(TaskDefinition::cron("cleanup", "0 3 * * *").unwrap(), noop())
        .await
        .unwrap();

    let summary = harness.scheduler("scheduler-a").tick().await;
    assert_eq!(summary.failed, vec!["broken".to_string()]);
    assert_eq!(summary.enqueued.len(), 1);
    assert_eq!(summary.enqueued[0].task_name, "cleanup");
}

#[tokio::test]
async fn test_predicate_schedule() {
    let harness = Harness::new();
    harness
        .registry
        .register(
            TaskDefinition::predicate("odd-hours", |now| chrono::Timelike::hour(&now) % 2 == 1),
            noop(),
        )
        .await
        .unwrap();
    let scheduler = harness.scheduler("scheduler-a");

    assert_eq!(scheduler.tick().await.enqueued.len(), 1);
    harness.clock.advance(chrono::Duration::hours(1));
    assert!(scheduler.tick().await.enqueued.is_empty());
}

#[tokio::test]
async fn test_manual_task_is_never_scheduled_but_can_be_submitted() {
    let harness = Harness::new();
    harness
        .registry
        .register(
            TaskDefinition::manual("adhoc").with_payload(json!({"source": "default"})),
            noop(),
        )
        .await
        .unwrap();
    let scheduler = harness.scheduler("scheduler-a");
    assert!(scheduler.tick().await.enqueued.is_empty());

    let defaulted = scheduler.submit("adhoc", None).await.unwrap();
    assert_eq!(defaulted.payload["source"], "default");
    assert!(defaulted.scheduled_for.is_none());

    let custom = scheduler
        .submit("adhoc", Some(json!({"source": "api"})))
        .await
        .unwrap();
    let first = harness.queue.dequeue(SHORT).await.unwrap().unwrap();
    let second = harness.queue.dequeue(SHORT).await.unwrap().unwrap();
    assert_eq!(first.id, defaulted.id);
    assert_eq!(second.id, custom.id);
    assert_eq!(second.payload["source"], "api");

    assert!(matches!(
        scheduler.submit("missing", None).await,
        Err(SchedulerError::TaskNotFound { .. })
    ));
}

#[tokio::test]
async fn test_next_run() {
    let harness = Harness::new();
    harness
        .registry
        .register(TaskDefinition::cron("every-5", "*/5 * * * *").unwrap(), noop())
        .await
        .unwrap();
    harness
        .registry
        .register(TaskDefinition::manual("adhoc"), noop())
        .await
        .unwrap();
    let scheduler = harness.scheduler("scheduler-a");

    harness.clock.advance(chrono::Duration::minutes(2));
    assert_eq!(
        scheduler.next_run("every-5").await.unwrap(),
        Some(three_am() + chrono::Duration::minutes(5))
    );
    assert_eq!(scheduler.next_run("adhoc").await.unwrap(), None);
    assert!(scheduler.next_run("missing").await.is_err());
}

/// 前几次入队失败的队列
struct FlakyQueue {
    inner: InMemoryJobQueue,
    failures_left: AtomicUsize,
}

#[async_trait]
impl JobQueue for FlakyQueue {
    async fn enqueue(&self, job: Job) -> SchedulerResult<()> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SchedulerError::Backend("connection refused".to_string()));
        }
        self.inner.enqueue(job).await
    }
    async fn dequeue(&self, timeout: Duration) -> SchedulerResult<Option<Job>> {
        self.inner.dequeue(timeout).await
    }
    async fn ack(&self, job_id: &str) -> SchedulerResult<()> {
        self.inner.ack(job_id).await
    }
    async fn nack(&self, job_id: &str, error: &str) -> SchedulerResult<Job> {
        self.inner.nack(job_id, error).await
    }
    async fn release(&self, job_id: &str, delay: Duration) -> SchedulerResult<()> {
        self.inner.release(job_id, delay).await
    }
    async fn touch(&self, job_id: &str) -> SchedulerResult<()> {
        self.inner.touch(job_id).await
    }
    async fn dead_letter(&self, job_id: &str, reason: &str) -> SchedulerResult<Job> {
        self.inner.dead_letter(job_id, reason).await
    }
    async fn dead_letters(&self) -> SchedulerResult<Vec<Job>> {
        self.inner.dead_letters().await
    }
    async fn replay_dead_letter(&self, job_id: &str) -> SchedulerResult<Job> {
        self.inner.replay_dead_letter(job_id).await
    }
    async fn stats(&self) -> SchedulerResult<QueueStats> {
        self.inner.stats().await
    }
}

#[tokio::test]
async fn test_backend_failure_is_retried_on_next_tick() {
    let harness = Harness::new();
    harness
        .registry
        .register(TaskDefinition::cron("cleanup", "0 3 * * *").unwrap(), noop())
        .await
        .unwrap();
    let clock: Arc<dyn Clock> = Arc::new(harness.clock.clone());
    let queue = Arc::new(FlakyQueue {
        inner: InMemoryJobQueue::new(clock.clone()),
        failures_left: AtomicUsize::new(1),
    });
    let scheduler = TaskScheduler::new(
        harness.registry.clone(),
        queue.clone(),
        harness.lock.clone(),
        clock,
        OwnerToken::new("scheduler-a"),
        TICK,
    );

    let failed = scheduler.tick().await;
    assert_eq!(failed.failed, vec!["cleanup".to_string()]);
    assert!(failed.enqueued.is_empty());

    harness.clock.advance(chrono::Duration::seconds(15));
    let retried = scheduler.tick().await;
    assert_eq!(retried.enqueued.len(), 1);
    assert_eq!(queue.stats().await.unwrap().ready, 1);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let harness = Harness::new();
    harness
        .registry
        .register(TaskDefinition::cron("cleanup", "0 3 * * *").unwrap(), noop())
        .await
        .unwrap();
    let scheduler = Arc::new(harness.scheduler("scheduler-a"));
    let (tx, rx) = tokio::sync::broadcast::channel(1);

    let handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(rx).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();

    // 第一次tick立即执行
    assert_eq!(harness.queue.stats().await.unwrap().ready, 1);
}
