use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio::sync::broadcast;

use jobq_core::config::WorkerConfig;
use jobq_core::models::{Job, JobContext, QueueStats, TaskDefinition};
use jobq_core::traits::{handler_fn, HealthStore, JobQueue, TaskHandler, TaskLock};
use jobq_core::{Clock, ManualClock, OwnerToken, RetryPolicy, TaskRegistry};
use jobq_infrastructure::{
    InMemoryHealthStore, InMemoryJobQueue, InMemoryLockStore, InMemoryQueueConfig,
};
use jobq_worker::{ExecutorSettings, JobExecutor, JobOutcome, WorkerPool};

struct Harness {
    clock: ManualClock,
    registry: Arc<TaskRegistry>,
    queue: Arc<InMemoryJobQueue>,
    lock: Arc<InMemoryLockStore>,
    health: Arc<InMemoryHealthStore>,
}

impl Harness {
    fn new() -> Self {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        Self {
            registry: Arc::new(TaskRegistry::new()),
            queue: Arc::new(InMemoryJobQueue::with_config(
                shared.clone(),
                InMemoryQueueConfig {
                    poll_interval: Duration::from_millis(10),
                    retry: RetryPolicy::immediate(),
                    ..Default::default()
                },
            )),
            lock: Arc::new(InMemoryLockStore::new(shared)),
            health: Arc::new(InMemoryHealthStore::new()),
            clock,
        }
    }

    fn pool(&self, config: &WorkerConfig) -> WorkerPool {
        let executor = JobExecutor::new(
            self.registry.clone(),
            self.queue.clone(),
            self.lock.clone(),
            self.health.clone(),
            Arc::new(self.clock.clone()),
            OwnerToken::new("worker-host:1:0"),
            ExecutorSettings::from(config),
        );
        WorkerPool::new(executor, self.queue.clone(), config)
    }

    async fn submit(&self, task: &str, max_attempts: u32) -> Job {
        let job = Job::new(task, json!({}), max_attempts, self.clock.now());
        self.queue.enqueue(job.clone()).await.unwrap();
        job
    }
}

fn config() -> WorkerConfig {
    WorkerConfig {
        dequeue_timeout_ms: 50,
        heartbeat_interval_seconds: 10,
        ..Default::default()
    }
}

/// 前 `failures` 次调用失败，之后成功
fn flaky(failures: usize, calls: Arc<AtomicUsize>) -> Arc<dyn TaskHandler> {
    handler_fn(move |_ctx| {
        let calls = calls.clone();
        async move {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            if call < failures {
                anyhow::bail!("transient failure {}", call + 1);
            }
            Ok(())
        }
    })
}

#[tokio::test]
async fn test_retries_until_success_within_attempt_budget() {
    let harness = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    harness
        .registry
        .register(
            TaskDefinition::manual("reports").with_max_attempts(3),
            flaky(2, calls.clone()),
        )
        .await
        .unwrap();
    harness.submit("reports", 3).await;

    let outcomes = harness.pool(&config()).drain().await.unwrap();
    assert_eq!(
        outcomes,
        vec![
            JobOutcome::Retrying { attempts: 1 },
            JobOutcome::Retrying { attempts: 2 },
            JobOutcome::Succeeded,
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(harness.queue.dead_letters().await.unwrap().is_empty());
    assert_eq!(harness.queue.stats().await.unwrap(), QueueStats::default());
    assert_eq!(
        harness.health.last_success("reports").await.unwrap(),
        Some(harness.clock.now())
    );
}

#[tokio::test]
async fn test_exhausted_job_moves_to_dead_letter_queue() {
    let harness = Harness::new();
    let handler = handler_fn(|_ctx| async {
        Err(anyhow::anyhow!("boom").context("写入报表失败"))
    });
    harness
        .registry
        .register(TaskDefinition::manual("reports"), handler)
        .await
        .unwrap();
    let job = harness.submit("reports", 3).await;

    let outcomes = harness.pool(&config()).drain().await.unwrap();
    assert_eq!(outcomes.last(), Some(&JobOutcome::DeadLettered { attempts: 3 }));
    assert_eq!(outcomes.len(), 3);

    let dead = harness.queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, job.id);
    assert_eq!(dead[0].attempts, 3);
    assert_eq!(dead[0].last_error.as_deref(), Some("写入报表失败: boom"));
    assert_eq!(harness.health.last_success("reports").await.unwrap(), None);
}

#[tokio::test]
async fn test_lock_contention_requeues_without_counting_attempt() {
    let harness = Harness::new();
    let attempts_seen = Arc::new(Mutex::new(Vec::new()));
    let seen = attempts_seen.clone();
    harness
        .registry
        .register(
            TaskDefinition::manual("cleanup").with_lock_ttl(Duration::from_secs(30)),
            handler_fn(move |ctx: JobContext| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(ctx.attempt);
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();
    assert!(harness
        .lock
        .try_acquire("cleanup", "other-worker", Duration::from_secs(30))
        .await
        .unwrap());
    harness.submit("cleanup", 3).await;
    let pool = harness.pool(&config());

    assert_eq!(
        pool.run_once(Duration::ZERO).await.unwrap(),
        Some(JobOutcome::Contended)
    );
    let stats = harness.queue.stats().await.unwrap();
    assert_eq!(stats.delayed, 1);
    assert_eq!(stats.in_flight, 0);
    // 竞争延迟未到之前作业不可见
    assert_eq!(pool.run_once(Duration::ZERO).await.unwrap(), None);

    harness
        .lock
        .release("cleanup", "other-worker")
        .await
        .unwrap();
    harness.clock.advance(chrono::Duration::seconds(5));
    assert_eq!(
        pool.run_once(Duration::ZERO).await.unwrap(),
        Some(JobOutcome::Succeeded)
    );
    assert_eq!(*attempts_seen.lock().unwrap(), vec![1]);
    // 执行结束后锁已释放
    assert!(harness.lock.current("cleanup").await.unwrap().is_none());
}

#[tokio::test]
async fn test_handler_timeout_counts_as_failure() {
    let harness = Harness::new();
    harness
        .registry
        .register(
            TaskDefinition::manual("slow")
                .with_max_attempts(1)
                .with_timeout(Duration::from_millis(50)),
            handler_fn(|_ctx| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }),
        )
        .await
        .unwrap();
    harness.submit("slow", 1).await;

    let outcome = harness
        .pool(&config())
        .run_once(Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(outcome, Some(JobOutcome::DeadLettered { attempts: 1 }));
    let dead = harness.queue.dead_letters().await.unwrap();
    assert!(dead[0].last_error.as_deref().unwrap().contains("超时"));
}

#[tokio::test]
async fn test_panicking_handler_is_retried() {
    let harness = Harness::new();
    harness
        .registry
        .register(
            TaskDefinition::manual("fragile"),
            handler_fn(|ctx: JobContext| async move {
                if ctx.attempt == 1 {
                    panic!("first attempt explodes");
                }
                Ok(())
            }),
        )
        .await
        .unwrap();
    harness.submit("fragile", 3).await;

    let outcomes = harness.pool(&config()).drain().await.unwrap();
    assert_eq!(
        outcomes,
        vec![JobOutcome::Retrying { attempts: 1 }, JobOutcome::Succeeded]
    );
}

#[tokio::test]
async fn test_unregistered_task_is_nacked() {
    let harness = Harness::new();
    harness.submit("ghost", 1).await;

    let outcome = harness
        .pool(&config())
        .run_once(Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(outcome, Some(JobOutcome::DeadLettered { attempts: 1 }));
    let dead = harness.queue.dead_letters().await.unwrap();
    assert!(dead[0].last_error.as_deref().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_concurrent_workers_process_each_job_exactly_once() {
    let harness = Harness::new();
    let executions: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let recorded = executions.clone();
    harness
        .registry
        .register(
            TaskDefinition::manual("fanout"),
            handler_fn(move |ctx: JobContext| {
                let recorded = recorded.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    *recorded.lock().unwrap().entry(ctx.job_id).or_insert(0) += 1;
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();

    let mut ids = Vec::new();
    for _ in 0..20 {
        ids.push(harness.submit("fanout", 3).await.id);
    }

    let pool = Arc::new(harness.pool(&WorkerConfig {
        concurrency: 4,
        ..config()
    }));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let running = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run(shutdown_rx).await })
    };

    tokio::time::timeout(Duration::from_secs(10), async {
        while executions.lock().unwrap().len() < ids.len() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("jobs were not processed in time");
    shutdown_tx.send(()).unwrap();
    running.await.unwrap();

    let executions = executions.lock().unwrap().clone();
    for id in &ids {
        assert_eq!(executions.get(id), Some(&1), "job {id} not executed exactly once");
    }
    assert_eq!(harness.queue.stats().await.unwrap(), QueueStats::default());
}
