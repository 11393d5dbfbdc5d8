//! # Client-wide configuration.
//!
//! Provides [`QueryConfig`] centralized defaults for a [`QueryClient`](crate::QueryClient).
//!
//! Config is used in two ways:
//! 1. **Client creation**: `QueryClient::builder(config)` / `QueryClient::new(config)`
//! 2. **Options defaults**: `QueryOptions::with_defaults(key, query_fn, &config)`
//!
//! ## Sentinel values
//! - `gc_time = None` → queries are never garbage-collected
//! - `bus_capacity = 0` → clamped to 1

use std::time::Duration;

use crate::policies::RetryDelay;
use crate::queries::options::{DEFAULT_GC_TIME, DEFAULT_RETRY};

/// Global configuration of a query client.
///
/// ## Field semantics
/// - `retry`: Default retry budget after a failed attempt
/// - `retry_delay`: Default delay-by-failure-count policy
/// - `gc_time`: Default idle time before an unobserved query is evicted (`None` = never)
/// - `stale_time`: Default age after which data is considered stale
/// - `bus_capacity`: Event bus ring buffer size (min 1)
#[derive(Clone, Debug)]
pub struct QueryConfig {
    /// Default retry budget.
    pub retry: u32,

    /// Default retry delay policy.
    pub retry_delay: RetryDelay,

    /// Default GC time.
    ///
    /// - `None` = unobserved queries stay cached forever
    /// - `Some(d)` = evicted `d` after the last observer detaches
    pub gc_time: Option<Duration>,

    /// Default stale time (`Duration::ZERO` = stale as soon as the clock moves).
    pub stale_time: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow receivers that lag behind more than `bus_capacity` events
    /// receive `Lagged` and skip older items.
    pub bus_capacity: usize,
}

impl QueryConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for QueryConfig {
    /// Default configuration:
    ///
    /// - `retry = 3`
    /// - `retry_delay = RetryDelay::default()`
    /// - `gc_time = Some(5 min)`
    /// - `stale_time = 0s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            retry: DEFAULT_RETRY,
            retry_delay: RetryDelay::default(),
            gc_time: Some(DEFAULT_GC_TIME),
            stale_time: Duration::ZERO,
            bus_capacity: 1024,
        }
    }
}
