//! Delay-by-failure-count function used between fetch retries.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::policies::BackoffPolicy;

/// How long to wait before retrying, given the failure count so far.
///
/// The failure count passed in is the number of failures **before** the one being
/// handled: the first retry sees `0`.
#[derive(Clone)]
pub enum RetryDelay {
    /// Exponential backoff (default: `min(1000 * 2^n, 30000)` ms).
    Backoff(BackoffPolicy),
    /// The same delay before every retry.
    Fixed(Duration),
    /// Caller-supplied function of the failure count.
    Custom(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl RetryDelay {
    /// Wraps a closure as [`RetryDelay::Custom`].
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        RetryDelay::Custom(Arc::new(f))
    }

    /// Delay before the retry that follows `failure_count` earlier failures.
    pub fn delay(&self, failure_count: u32) -> Duration {
        match self {
            RetryDelay::Backoff(policy) => policy.next(failure_count),
            RetryDelay::Fixed(d) => *d,
            RetryDelay::Custom(f) => f(failure_count),
        }
    }
}

impl Default for RetryDelay {
    fn default() -> Self {
        RetryDelay::Backoff(BackoffPolicy::default())
    }
}

impl fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryDelay::Backoff(policy) => f.debug_tuple("Backoff").field(policy).finish(),
            RetryDelay::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            RetryDelay::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sequence() {
        let delay = RetryDelay::default();
        let seq: Vec<Duration> = (0..3).map(|n| delay.delay(n)).collect();
        assert_eq!(
            seq,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000)
            ]
        );
    }

    #[test]
    fn fixed_and_custom() {
        assert_eq!(
            RetryDelay::Fixed(Duration::from_millis(10)).delay(7),
            Duration::from_millis(10)
        );
        let linear = RetryDelay::custom(|n| Duration::from_millis(100 * (u64::from(n) + 1)));
        assert_eq!(linear.delay(0), Duration::from_millis(100));
        assert_eq!(linear.delay(2), Duration::from_millis(300));
    }
}
