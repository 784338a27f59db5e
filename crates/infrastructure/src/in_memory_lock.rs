use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use jobq_core::models::LockLease;
use jobq_core::traits::TaskLock;
use jobq_core::{add_duration, Clock, SchedulerResult};

/// 单进程租约锁
///
/// 每个操作在互斥锁内完成读取和写入，相当于一次比较交换。
/// 锁不可重入：持有者再次获取同一个未过期的锁会失败。
pub struct InMemoryLockStore {
    leases: Mutex<HashMap<String, LockLease>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLockStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl TaskLock for InMemoryLockStore {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> SchedulerResult<bool> {
        let now = self.clock.now();
        let mut leases = self.leases.lock().await;
        if let Some(existing) = leases.get(key) {
            if !existing.is_expired(now) {
                debug!(key, owner, holder = %existing.owner, "锁已被持有");
                return Ok(false);
            }
            debug!(key, owner, stale_owner = %existing.owner, "回收过期的锁");
        }
        leases.insert(
            key.to_string(),
            LockLease {
                key: key.to_string(),
                owner: owner.to_string(),
                expires_at: add_duration(now, ttl),
            },
        );
        Ok(true)
    }

    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> SchedulerResult<bool> {
        let now = self.clock.now();
        let mut leases = self.leases.lock().await;
        match leases.get_mut(key) {
            Some(lease) if lease.is_held_by(owner, now) => {
                lease.expires_at = add_duration(now, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, owner: &str) -> SchedulerResult<()> {
        let mut leases = self.leases.lock().await;
        if leases.get(key).is_some_and(|lease| lease.is_owned_by(owner)) {
            leases.remove(key);
        }
        Ok(())
    }

    async fn current(&self, key: &str) -> SchedulerResult<Option<LockLease>> {
        let now = self.clock.now();
        let leases = self.leases.lock().await;
        Ok(leases
            .get(key)
            .filter(|lease| !lease.is_expired(now))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use jobq_core::ManualClock;

    const TTL: Duration = Duration::from_secs(30);

    fn setup() -> (ManualClock, InMemoryLockStore) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap());
        let store = InMemoryLockStore::new(Arc::new(clock.clone()));
        (clock, store)
    }

    #[tokio::test]
    async fn test_second_owner_blocked_until_expiry() {
        let (clock, store) = setup();
        assert!(store.try_acquire("cleanup", "A", TTL).await.unwrap());
        assert!(!store.try_acquire("cleanup", "B", TTL).await.unwrap());

        clock.advance(chrono::Duration::seconds(29));
        assert!(!store.try_acquire("cleanup", "B", TTL).await.unwrap());

        clock.advance(chrono::Duration::seconds(1));
        assert!(store.try_acquire("cleanup", "B", TTL).await.unwrap());
        assert_eq!(store.current("cleanup").await.unwrap().unwrap().owner, "B");
    }

    #[tokio::test]
    async fn test_renew_only_by_owner() {
        let (clock, store) = setup();
        assert!(store.try_acquire("cleanup", "A", TTL).await.unwrap());
        clock.advance(chrono::Duration::seconds(20));
        assert!(!store.renew("cleanup", "B", TTL).await.unwrap());
        assert!(store.renew("cleanup", "A", TTL).await.unwrap());

        clock.advance(chrono::Duration::seconds(20));
        assert!(!store.try_acquire("cleanup", "B", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_renew_after_expiry_fails() {
        let (clock, store) = setup();
        assert!(store.try_acquire("cleanup", "A", TTL).await.unwrap());
        clock.advance(chrono::Duration::seconds(31));
        assert!(!store.renew("cleanup", "A", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_straggler_release_is_noop() {
        let (clock, store) = setup();
        assert!(store.try_acquire("cleanup", "A", TTL).await.unwrap());
        clock.advance(chrono::Duration::seconds(31));
        assert!(store.try_acquire("cleanup", "B", TTL).await.unwrap());

        store.release("cleanup", "A").await.unwrap();
        assert_eq!(store.current("cleanup").await.unwrap().unwrap().owner, "B");

        store.release("cleanup", "B").await.unwrap();
        assert!(store.current("cleanup").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_single_winner() {
        let (_clock, store) = setup();
        let store = Arc::new(store);
        let attempts = (0..16).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .try_acquire("cleanup", &format!("owner-{i}"), TTL)
                    .await
                    .unwrap()
            })
        });
        let mut winners = 0;
        for attempt in attempts {
            if attempt.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
