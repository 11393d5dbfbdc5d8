//! # Exponential backoff between fetch retries.
//!
//! [`BackoffPolicy`] computes the delay before the next attempt from the number of
//! failures seen so far. It is parameterized by:
//! - [`BackoffPolicy::first`] the delay after the first failure;
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::max`] the maximum delay cap.
//!
//! The delay for failure count `n` (counted **before** the failure being handled,
//! so the first retry uses `n = 0`) is `first × factor^n`, clamped to `max`, then
//! jitter is applied.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use queryvisor::BackoffPolicy;
//!
//! let backoff = BackoffPolicy::default();
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(1000));
//! assert_eq!(backoff.next(1), Duration::from_millis(2000));
//! assert_eq!(backoff.next(2), Duration::from_millis(4000));
//!
//! // 1s × 2^10 → capped at max=30s
//! assert_eq!(backoff.next(10), Duration::from_secs(30));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Exponential retry backoff.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap for retries.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter policy to prevent thundering herd.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Returns a policy with:
    /// - `first = 1s`;
    /// - `factor = 2.0`;
    /// - `max = 30s`;
    /// - `jitter = None`.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(1000),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay for the given failure count (0-indexed).
    ///
    /// Non-finite or negative intermediate values clamp to [`BackoffPolicy::max`].
    pub fn next(&self, failure_count: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = failure_count.min(i32::MAX as u32) as i32;
        let unclamped_secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base =
            if !unclamped_secs.is_finite() || unclamped_secs < 0.0 || unclamped_secs > max_secs {
                self.max
            } else {
                Duration::from_secs_f64(unclamped_secs)
            };

        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn default_matches_capped_doubling() {
        let policy = BackoffPolicy::default();
        for n in 0..12u32 {
            let expected = (1000u64 * 2u64.pow(n)).min(30_000);
            assert_eq!(
                policy.next(n),
                Duration::from_millis(expected),
                "failure_count {n}"
            );
        }
    }

    #[test]
    fn constant_factor() {
        let policy = policy(500, 30_000, 1.0);
        for n in 0..10 {
            assert_eq!(policy.next(n), Duration::from_millis(500));
        }
    }

    #[test]
    fn first_exceeding_max_is_clamped() {
        let policy = policy(10_000, 5_000, 2.0);
        assert_eq!(policy.next(0), Duration::from_millis(5_000));
    }

    #[test]
    fn overflow_clamps_to_max() {
        let policy = policy(100, 10_000, 2.0);
        assert_eq!(policy.next(100), Duration::from_millis(10_000));
        assert_eq!(policy.next(u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn full_jitter_never_exceeds_base() {
        let policy = BackoffPolicy {
            jitter: JitterPolicy::Full,
            ..BackoffPolicy::default()
        };
        for n in 0..8u32 {
            let base = Duration::from_millis((1000u64 * 2u64.pow(n)).min(30_000));
            assert!(policy.next(n) <= base);
        }
    }
}
