//! Reconnect delay policy
//!
//! Exponential backoff: `base * 2^attempt`, capped at `max`, with an optional
//! random jitter added on top so that many clients do not reconnect in lockstep.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: Duration::ZERO,
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: Duration) -> Self {
        Self { base, max, jitter }
    }

    /// Delay before reconnect attempt `attempt`, without jitter.
    ///
    /// Never exceeds `max`, including for very large attempt counts.
    pub fn delay(&self, attempt: u32) -> Duration {
        let pow = attempt.min(32);
        let ms = self.base.as_millis().saturating_mul(1u128 << pow);
        let max_ms = self.max.as_millis();
        Duration::from_millis(ms.min(max_ms).min(u64::MAX as u128) as u64)
    }

    /// Delay with up to `jitter` extra added. Deterministic for a seeded `rng`.
    pub fn delay_with_jitter<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let delay = self.delay(attempt);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rng.random_range(0..=jitter_ms))
    }
}
