use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::debug;

use jobq_core::models::LockLease;
use jobq_core::traits::TaskLock;
use jobq_core::{add_duration, Clock, SchedulerResult};

use super::{backend_error, millis, RedisKeys};

const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Redis租约锁
///
/// 获取是一次 `SET NX PX`；续期和释放用Lua脚本比较持有者后再操作。
/// 过期由Redis服务端时间决定，`current` 返回的过期时间按本地时钟加剩余TTL估算。
pub struct RedisLockStore {
    conn: ConnectionManager,
    keys: RedisKeys,
    clock: Arc<dyn Clock>,
    renew_script: Script,
    release_script: Script,
}

impl RedisLockStore {
    pub fn new(conn: ConnectionManager, keys: RedisKeys, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn,
            keys,
            clock,
            renew_script: Script::new(RENEW_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    millis(ttl).max(1)
}

#[async_trait]
impl TaskLock for RedisLockStore {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> SchedulerResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.keys.lock(key))
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("SET NX", e))?;
        let acquired = reply.is_some();
        debug!(key, owner, acquired, "尝试获取锁");
        Ok(acquired)
    }

    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> SchedulerResult<bool> {
        let mut conn = self.conn.clone();
        let renewed: i64 = self
            .renew_script
            .key(self.keys.lock(key))
            .arg(owner)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("renew", e))?;
        Ok(renewed == 1)
    }

    async fn release(&self, key: &str, owner: &str) -> SchedulerResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .release_script
            .key(self.keys.lock(key))
            .arg(owner)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend_error("release", e))?;
        Ok(())
    }

    async fn current(&self, key: &str) -> SchedulerResult<Option<LockLease>> {
        let mut conn = self.conn.clone();
        let lock_key = self.keys.lock(key);
        let (owner, pttl): (Option<String>, i64) = redis::pipe()
            .get(&lock_key)
            .pttl(&lock_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("GET/PTTL", e))?;
        Ok(match owner {
            Some(owner) if pttl > 0 => Some(LockLease {
                key: key.to_string(),
                owner,
                expires_at: add_duration(self.clock.now(), Duration::from_millis(pttl as u64)),
            }),
            _ => None,
        })
    }
}
