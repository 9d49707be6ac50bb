use std::time::Duration;

use rand::Rng;

/// Exponential delay `base * 2^attempt`, capped at `max`, optionally jittered.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    /// 1s, 2s, 4s, ... for remote quota errors. No jitter: there is exactly
    /// one worker, so there is no herd to spread out.
    pub fn quota() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(64), false)
    }

    /// Pause after the worker loop itself fails (store unavailable).
    pub fn loop_error(poll: Duration) -> Self {
        Self::new(poll, poll.saturating_mul(12), true)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let cap = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let base = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let full = base.saturating_mul(1u64 << attempt.min(20)).min(cap);
        if self.jitter && full > 0 {
            Duration::from_millis(rng.gen_range(full / 2..=full))
        } else {
            Duration::from_millis(full)
        }
    }
}
