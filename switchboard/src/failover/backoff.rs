//! Backoff between failover attempts.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capped exponential backoff with additive jitter:
/// `min(base * 2^retry, cap) + uniform(0..=jitter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub jitter_ms: u64,
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, cap_ms: u64, jitter_ms: u64) -> Self {
        Self {
            base_ms,
            cap_ms,
            jitter_ms,
        }
    }

    /// Delay before jitter for the `retry`-th retry (0-indexed).
    pub fn base_delay_ms(&self, retry: u32) -> u64 {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        self.base_ms.saturating_mul(factor).min(self.cap_ms)
    }

    /// Delay including a jitter draw from `rng`.
    pub fn delay<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rng.gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(self.base_delay_ms(retry).saturating_add(jitter))
    }

    /// Upper bound of any delay this policy produces.
    pub fn max_delay_ms(&self) -> u64 {
        self.cap_ms.saturating_add(self.jitter_ms)
    }
}

impl Default for BackoffPolicy {
    /// 100ms base, 2s cap, up to 50ms jitter.
    fn default() -> Self {
        Self::new(100, 2_000, 50)
    }
}
