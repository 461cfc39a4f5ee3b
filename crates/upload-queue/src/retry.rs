use std::time::Duration;

use rand::Rng;

/// Default number of in-place retries for one chunk before the item fails.
pub const DEFAULT_CHUNK_RETRIES: u32 = 3;

/// Chunk-level retry policy with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 disables in-place retry).
    pub max_chunk_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_chunk_retries: DEFAULT_CHUNK_RETRIES,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that fails on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_chunk_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), with ±25% jitter so
    /// parallel workers do not hit the backend in lockstep.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let offset: f64 = rand::thread_rng().gen_range(-1.0..1.0);
        let with_jitter = (capped + capped * 0.25 * offset).max(0.0);
        Duration::from_secs_f64(with_jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within(d: Duration, nominal: f64) -> bool {
        let s = d.as_secs_f64();
        s >= nominal * 0.75 - 1e-9 && s <= nominal * 1.25 + 1e-9
    }

    #[test]
    fn grows_exponentially() {
        let p = RetryPolicy::default();
        assert!(within(p.delay_for_attempt(1), 0.25));
        assert!(within(p.delay_for_attempt(2), 0.5));
        assert!(within(p.delay_for_attempt(3), 1.0));
    }

    #[test]
    fn capped_at_max_delay() {
        let p = RetryPolicy::default();
        for retry in [6, 20, u32::MAX] {
            assert!(within(p.delay_for_attempt(retry), 4.0), "retry {retry}");
        }
    }

    #[test]
    fn no_retry_policy() {
        assert_eq!(RetryPolicy::no_retry().max_chunk_retries, 0);
    }
}
