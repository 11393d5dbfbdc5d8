//! Retry delay policies.
//!
//! This module groups the knobs that control **how long** the retry engine waits
//! between a failed fetch attempt and the next one.
//!
//! ## Contents
//! - [`RetryDelay`]    delay-by-failure-count function used by the retry engine
//! - [`BackoffPolicy`] exponential growth (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid thundering herd
//!
//! ## Quick wiring
//! ```text
//! QueryOptions { retry: u32, retry_delay: RetryDelay, .. }
//!      └─► core::retryer uses:
//!           - retry to decide settle/continue
//!           - retry_delay.delay(failure_count) to schedule the next attempt
//! ```
//!
//! ## Defaults
//! - `RetryDelay::default()` → `Backoff(BackoffPolicy::default())`.
//! - `BackoffPolicy::default()` → first=1s, factor=2.0, max=30s, jitter=None,
//!   i.e. `min(1000 * 2^n, 30000)` milliseconds.

mod backoff;
mod jitter;
mod retry_delay;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use retry_delay::RetryDelay;
