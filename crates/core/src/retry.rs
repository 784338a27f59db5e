use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 重试退避策略
///
/// 第 n 次失败后的延迟为 `min(base * multiplier^(n-1), max)`，随失败次数单调不减。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// 基础重试间隔（毫秒）
    pub base_delay_ms: u64,
    /// 最大重试间隔（毫秒）
    pub max_delay_ms: u64,
    /// 指数退避倍数
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 不等待，立即重试
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
        }
    }

    /// 已失败 `attempts` 次后重新可见前的等待时间
    pub fn delay_for(&self, attempts: u32) -> Duration {
        if attempts == 0 || self.base_delay_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = attempts.saturating_sub(1).min(63) as i32;
        let delay_ms = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(anyhow::anyhow!(
                "退避倍数必须不小于1.0: {}",
                self.multiplier
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(anyhow::anyhow!(
                "基础重试间隔 {}ms 不能大于最大重试间隔 {}ms",
                self.base_delay_ms,
                self.max_delay_ms
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_grows() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_is_capped_and_monotonic() {
        let policy = RetryPolicy {
            base_delay_ms: 500,
            max_delay_ms: 5_000,
            multiplier: 3.0,
        };
        let mut previous = Duration::ZERO;
        for attempts in 0..100 {
            let delay = policy.delay_for(attempts);
            assert!(delay >= previous, "delay decreased at attempt {attempts}");
            assert!(delay <= Duration::from_millis(5_000));
            previous = delay;
        }
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::immediate().validate().is_ok());
        let shrinking = RetryPolicy {
            multiplier: 0.5,
            ..Default::default()
        };
        assert!(shrinking.validate().is_err());
        let inverted = RetryPolicy {
            base_delay_ms: 10_000,
            max_delay_ms: 1_000,
            multiplier: 2.0,
        };
        assert!(inverted.validate().is_err());
    }
}
