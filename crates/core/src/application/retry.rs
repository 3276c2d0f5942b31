// Retry logic - exponential backoff with deterministic jitter
use std::time::Duration;

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given backoff delay
    Retry(Duration),
    /// Retries exhausted, give up
    GiveUp,
}

/// Retry policy shared by transfers, engine calls and callbacks
///
/// delay = min(base_delay * 2^attempt, max_delay) * jitter, jitter in [0.9, 1.1]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Never retry
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Backoff before retry number `attempt + 1` (attempt counts from 0)
    ///
    /// `seed` (job id or URL) makes the jitter deterministic per item, which
    /// spreads concurrent retries without a random source.
    pub fn delay_for(&self, attempt: u32, seed: &str) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let capped = exp.min(self.max_delay);

        let jitter_seed = seed.chars().map(|c| c as u32).fold(0u32, u32::wrapping_add);
        let jitter_percent = 90 + u128::from(jitter_seed % 21); // 0.9 to 1.1

        let nanos = capped.as_nanos() * jitter_percent / 100;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Decide what to do after failed attempt number `attempt` (0-based)
    pub fn decide(&self, attempt: u32, seed: &str) -> RetryDecision {
        if attempt >= self.max_retries {
            RetryDecision::GiveUp
        } else {
            RetryDecision::Retry(self.delay_for(attempt, seed))
        }
    }
}
