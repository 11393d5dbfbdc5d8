//! # Query client: the process-wide cache handle.
//!
//! [`QueryClient`] bundles a [`QueryCache`], the client-wide [`QueryConfig`]
//! defaults and, optionally, event subscribers. UI bindings and other
//! consumers create observers through it and use its imperative helpers.
//!
//! ## Architecture
//! ```text
//! QueryClientBuilder::build()
//!   ├─► Bus (broadcast)
//!   ├─► QueryCache (publishes to Bus)
//!   └─► subscriber listener: Bus ─► SubscriberSet ─► workers ─► Subscribe::on_event
//!
//! QueryClient
//!   ├─ observer(options)        → QueryObserver bound to the cache
//!   ├─ fetch_query(options)     → cached data if fresh, else fetch and await
//!   ├─ get/set_query_data(key)  → direct state access
//!   ├─ cancel/remove_queries    → prefix-matched bulk operations
//!   └─ shutdown()               → stop listener, drain and join subscribers
//! ```
//!
//! ## Key matching
//! Bulk operations take a key *filter*: a query matches when its key starts with
//! the filter's parts (`["todos"]` matches `["todos", 1]` and `["todos"]`).
//!
//! ## Example
//! ```rust
//! use queryvisor::{FetchError, FetchFn, QueryClient, QueryConfig, QueryFnContext, QueryKey};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), FetchError> {
//!     let client = QueryClient::new(QueryConfig::default());
//!     let opts = client.options(
//!         QueryKey::new().part("answer"),
//!         FetchFn::arc(|_ctx: QueryFnContext| async { Ok::<_, FetchError>(42u32) }),
//!     );
//!
//!     let data = client.fetch_query(opts).await?;
//!     assert_eq!(*data, 42);
//!     assert_eq!(client.get_query_data(&QueryKey::new().part("answer")).as_deref(), Some(&42));
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::{QueryCache, QueryClientBuilder, QueryConfig, QueryObserver, QueryState};
use crate::error::FetchError;
use crate::events::Event;
use crate::key::QueryKey;
use crate::queries::{QueryFnRef, QueryOptions};

/// Process-wide handle over a query cache.
pub struct QueryClient<T> {
    cfg: QueryConfig,
    cache: QueryCache<T>,
    listener: Mutex<Option<JoinHandle<()>>>,
    runtime_token: CancellationToken,
}

fn key_matches(filter: &QueryKey, key: &QueryKey) -> bool {
    key.parts().starts_with(filter.parts())
}

impl<T> QueryClient<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a client without subscribers.
    pub fn new(cfg: QueryConfig) -> Arc<Self> {
        Self::builder(cfg).build()
    }

    /// Returns a builder for a client with optional subscribers.
    pub fn builder(cfg: QueryConfig) -> QueryClientBuilder<T> {
        QueryClientBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: QueryConfig,
        cache: QueryCache<T>,
        listener: Option<JoinHandle<()>>,
        runtime_token: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            cache,
            listener: Mutex::new(listener),
            runtime_token,
        }
    }

    /// The underlying cache.
    pub fn query_cache(&self) -> &QueryCache<T> {
        &self.cache
    }

    /// Client-wide defaults.
    pub fn config(&self) -> &QueryConfig {
        &self.cfg
    }

    /// Options for `key` inheriting the client defaults.
    pub fn options(&self, key: QueryKey, query_fn: QueryFnRef<T>) -> QueryOptions<T> {
        QueryOptions::with_defaults(key, query_fn, &self.cfg)
    }

    /// Creates an observer over this client's cache.
    pub fn observer(&self, options: QueryOptions<T>) -> QueryObserver<T> {
        QueryObserver::new(&self.cache, options)
    }

    /// Returns cached data if it is fresh under `options`, otherwise fetches it.
    pub async fn fetch_query(&self, options: QueryOptions<T>) -> Result<Arc<T>, FetchError> {
        let query = self.cache.build(&options);
        if !query.is_stale_by_time(options.stale_time()) {
            if let Some(data) = query.state().data {
                return Ok(data);
            }
        }
        query.fetch(Some(options)).await
    }

    /// Cached data for `key`.
    pub fn get_query_data(&self, key: &QueryKey) -> Option<Arc<T>> {
        self.cache.find(key).and_then(|q| q.state().data)
    }

    /// State snapshot for `key`.
    pub fn get_query_state(&self, key: &QueryKey) -> Option<QueryState<T>> {
        self.cache.find(key).map(|q| q.state())
    }

    /// Writes `data` into the existing query for `key`, as a successful fetch would.
    ///
    /// Returns `None` (and stores nothing) if no query exists for `key`.
    pub fn set_query_data(&self, key: &QueryKey, data: T) -> Option<Arc<T>> {
        let query = self.cache.find(key)?;
        let data = Arc::new(data);
        query.set_data(Arc::clone(&data));
        Some(data)
    }

    /// Cancels the running fetch of every query matching `filter`.
    ///
    /// Returns the number of matched queries.
    pub fn cancel_queries(&self, filter: &QueryKey) -> usize {
        let matched: Vec<_> = self
            .cache
            .get_all()
            .into_iter()
            .filter(|q| key_matches(filter, q.key()))
            .collect();
        for query in &matched {
            query.cancel();
        }
        debug!(matched = matched.len(), "cancel_queries");
        matched.len()
    }

    /// Removes every query matching `filter` from the cache.
    ///
    /// Returns the number of removed queries.
    pub fn remove_queries(&self, filter: &QueryKey) -> usize {
        let removed = self
            .cache
            .get_all()
            .into_iter()
            .filter(|q| key_matches(filter, q.key()))
            .filter(|q| self.cache.remove(q))
            .count();
        debug!(removed, "remove_queries");
        removed
    }

    /// Removes every query.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Subscribes to cache events.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.cache.events()
    }

    /// Stops the subscriber listener, drains pending events and joins subscriber workers.
    ///
    /// Idempotent; the cache stays usable afterwards (events are no longer forwarded).
    pub async fn shutdown(&self) {
        self.runtime_token.cancel();
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = listener {
            let _ = handle.await;
        }
    }
}

impl<T> std::fmt::Debug for QueryClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("cfg", &self.cfg)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
