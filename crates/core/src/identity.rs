use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// 调度器/Worker进程的稳定身份标识，用作锁的持有者
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerToken(String);

impl OwnerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// 由主机名、进程号和启动时间组成，进程重启后会得到新的身份
    pub fn current() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());
        Self(format!(
            "{}:{}:{}",
            host,
            std::process::id(),
            Utc::now().timestamp_millis()
        ))
    }

    /// 同一进程内派生子身份，例如每个Worker一个
    pub fn child(&self, suffix: impl fmt::Display) -> Self {
        Self(format!("{}/{}", self.0, suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
