use std::time::Duration;

use rand::Rng;

use crate::config::RetrySection;

/// Exponential backoff with a hard cap and uniform jitter. Shared by the
/// platform client, the speech-to-text client and the job queue.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: Duration,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn from_config(config: &RetrySection) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the retry that follows `attempt` (zero-based: the first
    /// retry waits `base_delay`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        let scaled = self
            .base_delay
            .saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX));
        let capped = scaled.min(self.max_delay);
        if self.jitter.is_zero() {
            return capped;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        capped + Duration::from_millis(jitter_ms)
    }
}
