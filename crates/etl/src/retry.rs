//! Bounded exponential backoff with jitter.
//!
//! Shared by the source client (transient HTTP failures) and the loader
//! (dropped database connections). Unlike an unbounded reconnect loop, every
//! policy here has a fixed attempt ceiling so a run always terminates.

use std::time::Duration;

use rand::Rng;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub multiplier: f64,
    /// Jitter factor as a fraction (0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 4,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Millisecond delays without jitter; used by tests to keep runs fast.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }
}

/// Stateful retry policy for one operation.
///
/// # Example
///
/// ```rust
/// use cart_insights_etl::retry::{RetryConfig, RetryPolicy};
///
/// let mut policy = RetryPolicy::new(RetryConfig::immediate(3));
/// assert!(policy.next_delay().is_some());
/// assert!(policy.next_delay().is_some());
/// assert!(policy.next_delay().is_none());
/// assert_eq!(policy.attempts(), 3);
/// ```
#[derive(Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    current_delay: Duration,
    retries: u32,
}

impl RetryPolicy {
    /// Create a new retry policy.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            retries: 0,
        }
    }

    /// Delay to wait before the next attempt, or `None` once the attempt
    /// ceiling is reached.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries.saturating_add(1) >= self.config.max_attempts.max(1) {
            return None;
        }

        self.retries += 1;

        let delay = self.apply_jitter(self.current_delay.min(self.config.max_delay));

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay)
    }

    /// Attempts made so far, counting the first one.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.retries + 1
    }

    /// Upper bound for a single delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.config.max_delay
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn without_jitter(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[test]
    fn test_default_config_values() {
        let config = RetryConfig::default();
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(8));
        assert_eq!(config.max_attempts, 4);
    }

    #[test]
    fn test_delays_grow_exponentially_and_cap() {
        let mut policy = RetryPolicy::new(without_jitter(5));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(350)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(350)));
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.attempts(), 5);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let mut policy = RetryPolicy::new(RetryConfig::no_retry());
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.attempts(), 1);
    }

    #[test]
    fn test_zero_attempts_behaves_like_one() {
        let mut policy = RetryPolicy::new(without_jitter(0));
        assert_eq!(policy.next_delay(), None);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = RetryConfig {
            jitter_factor: 0.1,
            ..without_jitter(2)
        };
        for _ in 0..50 {
            let mut policy = RetryPolicy::new(config.clone());
            let delay = policy.next_delay().unwrap_or_default();
            assert!(delay >= Duration::from_millis(90));
            assert!(delay <= Duration::from_millis(110));
        }
    }
}
