use rand::Rng;
use std::time::Duration;

/// How often, and how far apart, the host re-fires a sync registration whose
/// handler did not finish cleanly.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base: Duration,
    max: Duration,
    jitter: bool,
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration, jitter: bool, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            jitter,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Longest pause between two dispatches of the same registration.
    pub fn max_delay(&self) -> Duration {
        self.max
    }

    /// `failed_attempts` counts dispatches that already failed, including the current one.
    pub fn exhausted(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_attempts
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let exp = base_ms.saturating_mul(1u64 << attempt.min(16)).min(max_ms);
        // Jitter keeps the first half of the window so retries never collapse to zero.
        let delay_ms = if self.jitter && exp > 1 {
            rng.gen_range(exp / 2..=exp)
        } else {
            exp
        };
        Duration::from_millis(delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(60), true, 5)
    }
}
