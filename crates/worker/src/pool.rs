use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::{error, info};

use jobq_core::config::WorkerConfig;
use jobq_core::traits::JobQueue;
use jobq_core::SchedulerResult;

use crate::components::{JobExecutor, JobOutcome};

/// Worker池
///
/// 固定数量的Worker并发地从队列取作业执行。每个Worker一次只执行一个作业，
/// 收到关闭信号后在当前作业结束时退出，未开始的作业留在队列中。
pub struct WorkerPool {
    executor: JobExecutor,
    queue: Arc<dyn JobQueue>,
    concurrency: usize,
    dequeue_timeout: Duration,
    error_backoff: Duration,
}

impl WorkerPool {
    pub fn new(executor: JobExecutor, queue: Arc<dyn JobQueue>, config: &WorkerConfig) -> Self {
        Self {
            executor,
            queue,
            concurrency: config.concurrency.max(1),
            dequeue_timeout: config.dequeue_timeout(),
            error_backoff: config.error_backoff(),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 运行所有Worker直到收到关闭信号
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) {
        info!(
            concurrency = self.concurrency,
            owner = %self.executor.owner(),
            "Worker池启动"
        );
        let workers = (0..self.concurrency).map(|index| {
            self.worker_loop(self.executor.for_worker(index), shutdown.resubscribe())
        });
        join_all(workers).await;
        info!("Worker池已停止");
    }

    async fn worker_loop(&self, executor: JobExecutor, mut shutdown: broadcast::Receiver<()>) {
        let owner = executor.owner().to_string();
        loop {
            let polled = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                polled = self.queue.dequeue(self.dequeue_timeout) => polled,
            };

            let result = match polled {
                Ok(Some(job)) => executor.execute(job).await.map(|_| ()),
                Ok(None) => continue,
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                error!(worker = %owner, error = %e, "Worker处理作业时出现后端错误");
                metrics::counter!("jobq_worker_errors_total").increment(1);
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(self.error_backoff) => {}
                }
            }
        }
        info!(worker = %owner, "Worker退出");
    }

    /// 等待最多 `timeout` 取出一个作业并执行，队列为空时返回 `None`
    pub async fn run_once(&self, timeout: Duration) -> SchedulerResult<Option<JobOutcome>> {
        match self.queue.dequeue(timeout).await? {
            Some(job) => Ok(Some(self.executor.execute(job).await?)),
            None => Ok(None),
        }
    }

    /// 执行队列中当前可见的所有作业，返回各作业的结果
    pub async fn drain(&self) -> SchedulerResult<Vec<JobOutcome>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.run_once(Duration::ZERO).await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}
