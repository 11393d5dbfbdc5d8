//! # Query options.
//!
//! Defines [`QueryOptions`], the configuration bundle describing one query:
//! key, fetch function, retry budget, retry delay, GC time, stale time and
//! whether observers may fetch automatically.
//!
//! Options can be created:
//! - **Explicitly** with [`QueryOptions::new`] (built-in defaults)
//! - **From config** with [`QueryOptions::with_defaults`] (inherit client defaults)
//!
//! ## Defaults
//! - `retry = 3`
//! - `retry_delay = RetryDelay::default()` (`min(1000 * 2^n, 30000)` ms)
//! - `gc_time = Some(5 min)` (`None` = never collected)
//! - `stale_time = 0`
//! - `enabled = true`

use std::fmt;
use std::time::Duration;

use crate::core::QueryConfig;
use crate::key::{QueryHash, QueryKey};
use crate::policies::RetryDelay;
use crate::queries::QueryFnRef;

/// Default number of retries after the first failed attempt.
pub const DEFAULT_RETRY: u32 = 3;

/// Default idle time before an unobserved query is evicted.
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(5 * 60);

/// Options of a single query.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use queryvisor::{FetchError, FetchFn, QueryFnContext, QueryKey, QueryOptions};
///
/// let opts = QueryOptions::new(
///     QueryKey::new().part("todos"),
///     FetchFn::arc(|_ctx: QueryFnContext| async { Ok::<_, FetchError>(vec![1, 2, 3]) }),
/// )
/// .with_stale_time(Duration::from_secs(30))
/// .with_retry(1);
///
/// assert_eq!(opts.retry(), 1);
/// assert_eq!(opts.gc_time(), Some(Duration::from_secs(300)));
/// ```
pub struct QueryOptions<T> {
    key: QueryKey,
    query_fn: QueryFnRef<T>,
    retry: u32,
    retry_delay: RetryDelay,
    gc_time: Option<Duration>,
    stale_time: Duration,
    enabled: bool,
}

impl<T> Clone for QueryOptions<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            query_fn: self.query_fn.clone(),
            retry: self.retry,
            retry_delay: self.retry_delay.clone(),
            gc_time: self.gc_time,
            stale_time: self.stale_time,
            enabled: self.enabled,
        }
    }
}

impl<T> fmt::Debug for QueryOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("key", &self.key)
            .field("retry", &self.retry)
            .field("retry_delay", &self.retry_delay)
            .field("gc_time", &self.gc_time)
            .field("stale_time", &self.stale_time)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl<T> QueryOptions<T> {
    /// Creates options with built-in defaults.
    pub fn new(key: QueryKey, query_fn: QueryFnRef<T>) -> Self {
        Self {
            key,
            query_fn,
            retry: DEFAULT_RETRY,
            retry_delay: RetryDelay::default(),
            gc_time: Some(DEFAULT_GC_TIME),
            stale_time: Duration::ZERO,
            enabled: true,
        }
    }

    /// Creates options inheriting retry/delay/GC/stale defaults from `cfg`.
    pub fn with_defaults(key: QueryKey, query_fn: QueryFnRef<T>, cfg: &QueryConfig) -> Self {
        Self {
            key,
            query_fn,
            retry: cfg.retry,
            retry_delay: cfg.retry_delay.clone(),
            gc_time: cfg.gc_time,
            stale_time: cfg.stale_time,
            enabled: true,
        }
    }

    /// Returns the query key.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Convenience: canonical hash of the key.
    pub fn hash(&self) -> QueryHash {
        self.key.hash()
    }

    /// Returns the fetch function.
    pub fn query_fn(&self) -> &QueryFnRef<T> {
        &self.query_fn
    }

    /// Returns the retry budget.
    pub fn retry(&self) -> u32 {
        self.retry
    }

    /// Returns the retry delay policy.
    pub fn retry_delay(&self) -> &RetryDelay {
        &self.retry_delay
    }

    /// Returns the GC time (`None` = never collected).
    pub fn gc_time(&self) -> Option<Duration> {
        self.gc_time
    }

    /// Returns the stale time.
    pub fn stale_time(&self) -> Duration {
        self.stale_time
    }

    /// Whether observers may trigger fetches automatically.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Returns new options with a different key.
    pub fn with_key(mut self, key: QueryKey) -> Self {
        self.key = key;
        self
    }

    /// Returns new options with a different fetch function.
    pub fn with_query_fn(mut self, query_fn: QueryFnRef<T>) -> Self {
        self.query_fn = query_fn;
        self
    }

    /// Returns new options with an updated retry budget.
    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// Returns new options with an updated retry delay.
    pub fn with_retry_delay(mut self, retry_delay: RetryDelay) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Returns new options with an updated GC time.
    pub fn with_gc_time(mut self, gc_time: Option<Duration>) -> Self {
        self.gc_time = gc_time;
        self
    }

    /// Returns new options with an updated stale time.
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    /// Returns new options with automatic fetching switched on or off.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
