//! Exponential backoff with jitter for retried run steps.
//!
//! Used around the render step (navigate + wait for the listing container)
//! and around warehouse calls that fail on connectivity. Callers own the loop:
//!
//! ```ignore
//! let mut attempt = 0;
//! loop {
//!     attempt += 1;
//!     match step().await {
//!         Ok(v) => break Ok(v),
//!         Err(e) if backoff.allows_retry(attempt) => sleep(backoff.delay(attempt)).await,
//!         Err(e) => break Err(e),
//!     }
//! }
//! ```
//!
//! # Backoff Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=250ms)
//! ```

use rand::{Rng, rng};
use std::time::Duration;

const MAX_JITTER_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total attempts, the first one included. Never below 1.
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Backoff {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Backoff::new(1, Duration::ZERO).without_jitter()
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Whether another attempt may follow the failed `attempt` (1-based).
    pub fn allows_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait after the failed `attempt` (1-based).
    pub fn delay(&self, attempt: usize) -> Duration {
        let exp = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX).min(16);
        let delay = self.base_delay.saturating_mul(1 << exp).min(self.max_delay);
        if self.jitter {
            delay + Duration::from_millis(rng().random_range(0..=MAX_JITTER_MS))
        } else {
            delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_and_cap() {
        let b = Backoff::new(10, Duration::from_secs(5)).without_jitter();
        assert_eq!(b.delay(1), Duration::from_secs(5));
        assert_eq!(b.delay(2), Duration::from_secs(10));
        assert_eq!(b.delay(3), Duration::from_secs(20));
        assert_eq!(b.delay(4), Duration::from_secs(30));
        assert_eq!(b.delay(60), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_bounded() {
        let b = Backoff::new(3, Duration::from_secs(1));
        for _ in 0..20 {
            let d = b.delay(1);
            assert!(d >= Duration::from_secs(1));
            assert!(d <= Duration::from_millis(1_000 + MAX_JITTER_MS));
        }
    }

    #[test]
    fn test_allows_retry() {
        let b = Backoff::new(3, Duration::ZERO);
        assert!(b.allows_retry(1));
        assert!(b.allows_retry(2));
        assert!(!b.allows_retry(3));
        assert!(!Backoff::none().allows_retry(1));
        assert_eq!(Backoff::new(0, Duration::ZERO).max_attempts(), 1);
    }
}
