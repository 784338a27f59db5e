use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use jobq_core::config::WorkerConfig;
use jobq_core::models::{Job, JobContext, JobStatus};
use jobq_core::traits::{HealthStore, JobQueue, TaskHandler, TaskLock};
use jobq_core::{panic_message, Clock, OwnerToken, SchedulerError, SchedulerResult, TaskRegistry};

use super::heartbeat_manager::{ExecutionLease, HeartbeatManager};

/// 单个作业的执行参数
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// 任务没有设置超时时使用
    pub execution_timeout: Duration,
    pub contention_retry_delay: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl ExecutorSettings {
    /// 执行锁租期是否长于心跳间隔；否则租约会在第一次续租前过期
    pub fn lease_outlives_heartbeat(&self, lock_ttl: Duration) -> bool {
        lock_ttl > self.heartbeat_interval
    }
}

impl From<&WorkerConfig> for ExecutorSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            execution_timeout: config.execution_timeout(),
            contention_retry_delay: config.contention_retry_delay(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }
}

/// 作业执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    /// 失败但还有剩余尝试次数，已按退避重新排队
    Retrying { attempts: u32 },
    DeadLettered { attempts: u32 },
    /// 执行锁被其他Worker持有，作业已不计次数地重新排队
    Contended,
}

/// 单个作业的状态机：解析处理器，获取执行锁，在超时内执行，并把结果报告给队列
#[derive(Clone)]
pub struct JobExecutor {
    registry: Arc<TaskRegistry>,
    queue: Arc<dyn JobQueue>,
    lock: Arc<dyn TaskLock>,
    health: Arc<dyn HealthStore>,
    clock: Arc<dyn Clock>,
    owner: OwnerToken,
    settings: ExecutorSettings,
}

impl JobExecutor {
    pub fn new(
        registry: Arc<TaskRegistry>,
        queue: Arc<dyn JobQueue>,
        lock: Arc<dyn TaskLock>,
        health: Arc<dyn HealthStore>,
        clock: Arc<dyn Clock>,
        owner: OwnerToken,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            registry,
            queue,
            lock,
            health,
            clock,
            owner,
            settings,
        }
    }

    /// 为池中第 `index` 个Worker派生执行器，每个Worker有自己的锁持有者身份
    pub fn for_worker(&self, index: usize) -> Self {
        let mut executor = self.clone();
        executor.owner = self.owner.child(index);
        executor
    }

    pub fn owner(&self) -> &OwnerToken {
        &self.owner
    }

    pub async fn execute(&self, job: Job) -> SchedulerResult<JobOutcome> {
        let Some(task) = self.registry.get(&job.task_name).await else {
            let message = SchedulerError::TaskNotFound {
                name: job.task_name.clone(),
            }
            .to_string();
            error!(job_id = %job.id, task = %job.task_name, "作业对应的任务未注册");
            return self.fail(&job, &message).await;
        };
        let definition = &task.definition;

        let lease = if definition.requires_lock() {
            if !self.settings.lease_outlives_heartbeat(definition.lock_ttl) {
                warn!(
                    task = %definition.name,
                    lock_ttl_ms = definition.lock_ttl.as_millis() as u64,
                    heartbeat_ms = self.settings.heartbeat_interval.as_millis() as u64,
                    "执行锁租期不长于心跳间隔，租约可能在续租前过期"
                );
            }
            let acquired = self
                .lock
                .try_acquire(&definition.name, self.owner.as_str(), definition.lock_ttl)
                .await?;
            if !acquired {
                debug!(job_id = %job.id, task = %definition.name, "执行锁被占用，稍后重试");
                metrics::counter!("jobq_lock_contention_total", "task" => definition.name.clone())
                    .increment(1);
                self.queue
                    .release(&job.id, self.settings.contention_retry_delay)
                    .await?;
                return Ok(JobOutcome::Contended);
            }
            Some(ExecutionLease {
                key: definition.name.clone(),
                owner: self.owner.to_string(),
                ttl: definition.lock_ttl,
            })
        } else {
            None
        };

        let timeout = definition.timeout.unwrap_or(self.settings.execution_timeout);
        let context = JobContext::from(&job);
        info!(
            job_id = %job.id,
            task = %definition.name,
            attempt = context.attempt,
            "开始执行作业"
        );

        let heartbeat = HeartbeatManager::start(
            self.queue.clone(),
            self.lock.clone(),
            job.id.clone(),
            lease.clone(),
            self.settings.heartbeat_interval,
        );
        let started = Instant::now();
        let result = run_handler(task.handler.clone(), context, timeout).await;
        let elapsed = started.elapsed();
        heartbeat.stop().await;

        if let Some(lease) = &lease {
            if let Err(e) = self.lock.release(&lease.key, &lease.owner).await {
                warn!(task = %lease.key, error = %e, "释放执行锁失败，等待其自然过期");
            }
        }

        metrics::histogram!("jobq_job_duration_seconds", "task" => definition.name.clone())
            .record(elapsed.as_secs_f64());

        match result {
            Ok(()) => {
                self.queue.ack(&job.id).await?;
                metrics::counter!("jobq_jobs_succeeded_total", "task" => definition.name.clone())
                    .increment(1);
                info!(
                    job_id = %job.id,
                    task = %definition.name,
                    duration_ms = elapsed.as_millis() as u64,
                    "作业执行成功"
                );
                if let Err(e) = self
                    .health
                    .record_success(&definition.name, self.clock.now())
                    .await
                {
                    warn!(task = %definition.name, error = %e, "记录健康状态失败");
                }
                Ok(JobOutcome::Succeeded)
            }
            Err(message) => {
                warn!(job_id = %job.id, task = %definition.name, error = %message, "作业执行失败");
                self.fail(&job, &message).await
            }
        }
    }

    async fn fail(&self, job: &Job, message: &str) -> SchedulerResult<JobOutcome> {
        let updated = self.queue.nack(&job.id, message).await?;
        if updated.status == JobStatus::DeadLettered {
            metrics::counter!("jobq_jobs_dead_lettered_total", "task" => job.task_name.clone())
                .increment(1);
            error!(
                job_id = %job.id,
                task = %job.task_name,
                attempts = updated.attempts,
                "作业尝试次数耗尽，移入死信队列"
            );
            Ok(JobOutcome::DeadLettered {
                attempts: updated.attempts,
            })
        } else {
            metrics::counter!("jobq_jobs_retried_total", "task" => job.task_name.clone())
                .increment(1);
            Ok(JobOutcome::Retrying {
                attempts: updated.attempts,
            })
        }
    }
}

/// 在独立任务中运行处理器，panic和超时都转换为失败信息
///
/// 超时后放弃等待并中止该任务；处理器中的阻塞代码可能继续运行。
async fn run_handler(
    handler: Arc<dyn TaskHandler>,
    context: JobContext,
    timeout: Duration,
) -> Result<(), String> {
    let mut handle = tokio::spawn(async move { handler.execute(&context).await });
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(format!("{e:#}")),
        Ok(Err(join_error)) if join_error.is_panic() => {
            let panic = join_error.into_panic();
            Err(format!("处理器panic: {}", panic_message(&*panic)))
        }
        Ok(Err(join_error)) => Err(format!("处理器被取消: {join_error}")),
        Err(_) => {
            handle.abort();
            Err(SchedulerError::ExecutionTimeout {
                seconds: timeout.as_secs(),
            }
            .to_string())
        }
    }
}
