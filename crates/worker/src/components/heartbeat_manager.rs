use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use jobq_core::traits::{JobQueue, TaskLock};

/// Worker持有的执行锁租约
#[derive(Debug, Clone)]
pub struct ExecutionLease {
    pub key: String,
    pub owner: String,
    pub ttl: Duration,
}

/// 作业执行期间的心跳
///
/// 每个周期延长作业的可见性期限；作业持有执行锁时同时续租。续租失败说明租约已丢失，
/// 只记录错误，正在运行的处理器不会被中断。
pub struct HeartbeatManager {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl HeartbeatManager {
    pub fn start(
        queue: Arc<dyn JobQueue>,
        lock: Arc<dyn TaskLock>,
        job_id: String,
        lease: Option<ExecutionLease>,
        heartbeat_interval: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut lease_lost = false;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = queue.touch(&job_id).await {
                            warn!(job_id = %job_id, error = %e, "延长作业可见性失败");
                        }
                        let Some(lease) = lease.as_ref().filter(|_| !lease_lost) else {
                            continue;
                        };
                        match lock.renew(&lease.key, &lease.owner, lease.ttl).await {
                            Ok(true) => debug!(task = %lease.key, "执行锁已续租"),
                            Ok(false) => {
                                lease_lost = true;
                                metrics::counter!("jobq_lock_lost_total", "task" => lease.key.clone())
                                    .increment(1);
                                error!(
                                    task = %lease.key,
                                    job_id = %job_id,
                                    "执行锁租约已丢失，其他Worker可能并发执行同一任务"
                                );
                            }
                            Err(e) => warn!(task = %lease.key, error = %e, "执行锁续租失败"),
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }
        });

        Self { stop_tx, handle }
    }

    /// 停止心跳并等待后台任务退出
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        if let Err(e) = self.handle.await {
            warn!(error = %e, "心跳任务异常退出");
        }
    }
}
