use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 锁租约 `(key, owner, expires_at)`
///
/// 同一个键在任一时刻最多存在一个未过期的租约。`expires_at` 已经过去的租约是陈旧的，
/// 任何持有者都可以回收。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    pub key: String,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl LockLease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner == owner
    }

    /// 指定持有者在当前时刻是否仍然有效地持有该租约
    pub fn is_held_by(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.is_owned_by(owner) && !self.is_expired(now)
    }
}
