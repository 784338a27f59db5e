use std::sync::Arc;

use tracing::info;

use jobq_core::config::{AppConfig, QueueBackend};
use jobq_core::traits::{HealthStore, JobQueue, TaskLock};
use jobq_core::{Clock, SchedulerResult};

use crate::redis_store::{self, RedisHealthStore, RedisJobQueue, RedisKeys, RedisLockStore};
use crate::{InMemoryHealthStore, InMemoryJobQueue, InMemoryLockStore, InMemoryQueueConfig};

/// 调度器和Worker共享的一组后端
#[derive(Clone)]
pub struct Backends {
    pub queue: Arc<dyn JobQueue>,
    pub lock: Arc<dyn TaskLock>,
    pub health: Arc<dyn HealthStore>,
}

pub struct BackendFactory;

impl BackendFactory {
    /// 按 `queue.backend` 创建队列、锁和健康记录存储
    pub async fn create(config: &AppConfig, clock: Arc<dyn Clock>) -> SchedulerResult<Backends> {
        match config.queue.backend {
            QueueBackend::Memory => {
                info!("使用内存后端");
                Ok(Self::in_memory(config, clock))
            }
            QueueBackend::Redis => {
                info!(url = %config.redis.url, prefix = %config.redis.key_prefix, "使用Redis后端");
                let conn = redis_store::connect(&config.redis).await?;
                let keys = RedisKeys::new(config.redis.key_prefix.clone());
                Ok(Backends {
                    queue: Arc::new(RedisJobQueue::new(
                        conn.clone(),
                        keys.clone(),
                        clock.clone(),
                        config.queue.retry.clone(),
                        config.queue.visibility_timeout(),
                        config.queue.poll_interval(),
                    )),
                    lock: Arc::new(RedisLockStore::new(conn.clone(), keys.clone(), clock)),
                    health: Arc::new(RedisHealthStore::new(conn, keys)),
                })
            }
        }
    }

    pub fn in_memory(config: &AppConfig, clock: Arc<dyn Clock>) -> Backends {
        let queue_config = InMemoryQueueConfig {
            visibility_timeout: config.queue.visibility_timeout(),
            poll_interval: config.queue.poll_interval(),
            retry: config.queue.retry.clone(),
        };
        Backends {
            queue: Arc::new(InMemoryJobQueue::with_config(clock.clone(), queue_config)),
            lock: Arc::new(InMemoryLockStore::new(clock)),
            health: Arc::new(InMemoryHealthStore::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobq_core::models::Job;
    use jobq_core::SystemClock;
    use std::time::Duration;

    #[tokio::test]
    async fn test_default_config_builds_memory_backends() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backends = BackendFactory::create(&AppConfig::default(), clock.clone())
            .await
            .unwrap();

        backends
            .queue
            .enqueue(Job::new("reports", serde_json::Value::Null, 3, clock.now()))
            .await
            .unwrap();
        assert!(backends
            .queue
            .dequeue(Duration::from_millis(50))
            .await
            .unwrap()
            .is_some());
        assert!(backends
            .lock
            .try_acquire("reports", "A", Duration::from_secs(1))
            .await
            .unwrap());
    }
}
