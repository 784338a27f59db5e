use std::time::Duration;

use async_trait::async_trait;

use crate::models::LockLease;
use crate::Result;

/// 基于租约的互斥锁
///
/// 租约不是存活检测：崩溃的持有者的锁会自行过期，因此TTL应明显大于任务的预期运行时间
/// 加一个心跳周期。所有操作都应在后端一次往返内完成。
#[async_trait]
pub trait TaskLock: Send + Sync {
    /// 不存在有效租约（或已有租约过期）时原子地获取
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// 仅当调用方仍是当前持有者时延长租约
    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// 调用方不是当前持有者时不做任何事
    async fn release(&self, key: &str, owner: &str) -> Result<()>;

    /// 当前未过期的租约
    async fn current(&self, key: &str) -> Result<Option<LockLease>>;
}
