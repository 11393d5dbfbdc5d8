//! # Query observer: a per-consumer view over one query.
//!
//! A [`QueryObserver`] derives a [`QueryObserverResult`] from the state of the
//! query its options point at, and notifies its own listeners only when that
//! derived result changes.
//!
//! ## Lifecycle
//! ```text
//! new(cache, options)      build query (not attached yet)
//!   │
//! subscribe(first)  ───►  re-resolve query in cache, attach, update result,
//!   │                     fetch if enabled && stale && not fetching
//!   │
//!   │  query dispatch ──► on_query_update ──► update_result ──► listeners (if changed)
//!   │
//! set_options(new)  ───►  key changed? detach old → build new → attach
//!   │
//! unsubscribe(last) ───►  detach (query arms GC when it has no observers left)
//! ```
//!
//! ## Rules
//! - Only attached observers receive query notifications
//! - Attaching and refetching go through the cache, so a query collected
//!   before the first listener is rebuilt instead of observed as an orphan
//! - Listeners are called without any observer or query lock held
//! - Results are compared shallowly: data by `Arc` identity, other fields by value

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::core::cache::QueryCache;
use crate::core::query::Query;
use crate::core::retryer::FetchOutcome;
use crate::core::state::{FetchStatus, QueryState, QueryStatus};
use crate::error::FetchError;
use crate::key::QueryHash;
use crate::queries::QueryOptions;
use crate::subscribable::{Listener, Subscribable, Unsubscribe};

/// Consumer-facing snapshot of a query.
#[derive(Debug)]
pub struct QueryObserverResult<T> {
    /// Last fetched data (kept during refetches and after errors).
    pub data: Option<Arc<T>>,
    /// Last terminal error.
    pub error: Option<FetchError>,
    /// Result status.
    pub status: QueryStatus,
    /// In-flight marker.
    pub fetch_status: FetchStatus,
    /// When the data was last written.
    pub data_updated_at: Instant,
    /// Staleness under the observer's own stale time, at derivation time.
    pub is_stale: bool,
}

impl<T> QueryObserverResult<T> {
    fn derive(state: &QueryState<T>, stale_time: Duration, now: Instant) -> Self {
        Self {
            data: state.data.clone(),
            error: state.error.clone(),
            status: state.status,
            fetch_status: state.fetch_status,
            data_updated_at: state.data_updated_at,
            is_stale: state.is_stale_by_time(stale_time, now),
        }
    }

    /// `status == Pending`.
    pub fn is_pending(&self) -> bool {
        self.status == QueryStatus::Pending
    }

    /// `status == Success`.
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    /// `status == Error`.
    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// A fetch run is in flight.
    pub fn is_fetching(&self) -> bool {
        self.fetch_status == FetchStatus::Fetching
    }

    /// First load: pending and fetching.
    pub fn is_loading(&self) -> bool {
        self.is_pending() && self.is_fetching()
    }
}

impl<T> Clone for QueryObserverResult<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            error: self.error.clone(),
            status: self.status,
            fetch_status: self.fetch_status,
            data_updated_at: self.data_updated_at,
            is_stale: self.is_stale,
        }
    }
}

impl<T> PartialEq for QueryObserverResult<T> {
    fn eq(&self, other: &Self) -> bool {
        let same_data = match (&self.data, &other.data) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_data
            && self.error == other.error
            && self.status == other.status
            && self.fetch_status == other.fetch_status
            && self.data_updated_at == other.data_updated_at
            && self.is_stale == other.is_stale
    }
}

struct ObserverInner<T> {
    options: QueryOptions<T>,
    query: Arc<Query<T>>,
    current: QueryObserverResult<T>,
    attached: bool,
}

pub(crate) struct ObserverCore<T> {
    this: Weak<ObserverCore<T>>,
    cache: QueryCache<T>,
    listeners: Subscribable<QueryObserverResult<T>>,
    inner: Mutex<ObserverInner<T>>,
}

fn should_fetch<T>(options: &QueryOptions<T>, query: &Query<T>) -> bool
where
    T: Send + Sync + 'static,
{
    options.enabled() && !query.is_fetching() && query.is_stale_by_time(options.stale_time())
}

impl<T> ObserverCore<T>
where
    T: Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, ObserverInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by the query after every dispatch.
    pub(crate) fn on_query_update(&self) {
        self.update_result();
    }

    fn update_result(&self) {
        let next = {
            let mut inner = self.lock();
            let state = inner.query.state();
            let next =
                QueryObserverResult::derive(&state, inner.options.stale_time(), Instant::now());
            if next == inner.current {
                return;
            }
            inner.current = next.clone();
            next
        };
        self.listeners.broadcast(&next);
    }

    fn attach(&self) {
        let Some(me) = self.this.upgrade() else {
            return;
        };
        let options = {
            let mut inner = self.lock();
            if inner.attached {
                return;
            }
            inner.attached = true;
            inner.options.clone()
        };

        let query = self.cache.build(&options);
        self.lock().query = Arc::clone(&query);
        query.add_observer(&me);
        self.update_result();
        if should_fetch(&options, &query) {
            trace!(query = %query.hash(), "fetch on attach");
            let _ = query.fetch(Some(options));
        }
    }

    /// Returns the cache's query for the current options, re-pointing the
    /// observer when the stored one has been evicted.
    fn resolve_query(&self) -> (Arc<Query<T>>, QueryOptions<T>) {
        let (stored, options, attached) = {
            let inner = self.lock();
            (Arc::clone(&inner.query), inner.options.clone(), inner.attached)
        };
        let live = self.cache.build(&options);
        if Arc::ptr_eq(&stored, &live) {
            return (live, options);
        }

        trace!(query = %live.hash(), "observed query was evicted, re-resolved");
        self.lock().query = Arc::clone(&live);
        if attached {
            if let Some(me) = self.this.upgrade() {
                stored.remove_observer(&me);
                live.add_observer(&me);
            }
        }
        self.update_result();
        (live, options)
    }

    fn detach(&self) {
        let Some(me) = self.this.upgrade() else {
            return;
        };
        let query = {
            let mut inner = self.lock();
            if !inner.attached {
                return;
            }
            inner.attached = false;
            Arc::clone(&inner.query)
        };
        query.remove_observer(&me);
    }
}

/// Per-consumer view over a query.
///
/// Cheap to clone; clones share listeners and state.
pub struct QueryObserver<T> {
    core: Arc<ObserverCore<T>>,
}

impl<T> Clone for QueryObserver<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> QueryObserver<T>
where
    T: Send + Sync + 'static,
{
    /// Creates an observer and builds (or finds) its query in `cache`.
    ///
    /// The observer attaches to the query on its first listener.
    pub fn new(cache: &QueryCache<T>, options: QueryOptions<T>) -> Self {
        let query = cache.build(&options);
        let current =
            QueryObserverResult::derive(&query.state(), options.stale_time(), Instant::now());
        let core = Arc::new_cyclic(|this| ObserverCore {
            this: this.clone(),
            cache: cache.clone(),
            listeners: Subscribable::new(),
            inner: Mutex::new(ObserverInner {
                options,
                query,
                current,
                attached: false,
            }),
        });
        Self { core }
    }

    /// Last derived result.
    pub fn get_current_result(&self) -> QueryObserverResult<T> {
        self.core.lock().current.clone()
    }

    /// Result for `options` as it would be right after subscribing.
    ///
    /// Builds the query for `options` if needed and starts a fetch when the
    /// options are enabled, the data is absent or stale and no fetch is in flight.
    pub fn get_optimistic_result(&self, options: &QueryOptions<T>) -> QueryObserverResult<T> {
        let query = self.core.cache.build(options);
        if should_fetch(options, &query) {
            trace!(query = %query.hash(), "optimistic fetch");
            let _ = query.fetch(Some(options.clone()));
        }
        QueryObserverResult::derive(&query.state(), options.stale_time(), Instant::now())
    }

    /// Registers a listener for result changes.
    ///
    /// The first listener attaches the observer to its query.
    #[must_use = "dropping the subscription keeps the listener registered forever"]
    pub fn subscribe(&self, listener: Listener<QueryObserverResult<T>>) -> ObserverSubscription<T> {
        let token = self.core.listeners.subscribe(listener);
        if self.core.listeners.len() == 1 {
            self.core.attach();
        }
        ObserverSubscription {
            token,
            core: Arc::downgrade(&self.core),
        }
    }

    /// Re-derives the result and notifies listeners if it changed.
    pub fn update_result(&self) {
        self.core.update_result();
    }

    /// Replaces the options; re-points the observer if the key hash changed.
    pub fn set_options(&self, options: QueryOptions<T>) {
        let core = &self.core;
        let Some(me) = core.this.upgrade() else {
            return;
        };
        let new_hash = options.hash();
        let (old_query, attached) = {
            let inner = core.lock();
            (Arc::clone(&inner.query), inner.attached)
        };

        let query = if *old_query.hash() == new_hash {
            old_query
        } else {
            trace!(from = %old_query.hash(), to = %new_hash, "observer re-keyed");
            if attached {
                old_query.remove_observer(&me);
            }
            core.cache.build(&options)
        };

        {
            let mut inner = core.lock();
            inner.query = Arc::clone(&query);
            inner.options = options.clone();
        }
        if attached {
            query.add_observer(&me);
        }

        core.update_result();
        if attached && should_fetch(&options, &query) {
            let _ = query.fetch(Some(options));
        }
    }

    /// Fetches with the observer's options, regardless of staleness.
    pub fn refetch(&self) -> FetchOutcome<T> {
        let (query, options) = self.core.resolve_query();
        query.fetch(Some(options))
    }

    /// Current options.
    pub fn options(&self) -> QueryOptions<T> {
        self.core.lock().options.clone()
    }

    /// Hash of the query currently observed.
    pub fn query_hash(&self) -> QueryHash {
        self.core.lock().query.hash().clone()
    }

    /// True while attached to its query.
    pub fn is_attached(&self) -> bool {
        self.core.lock().attached
    }

    /// Drops all listeners and detaches from the query.
    pub fn destroy(&self) {
        self.core.listeners.clear();
        self.core.detach();
    }
}

impl<T> std::fmt::Debug for QueryObserver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryObserver")
            .field("listeners", &self.core.listeners.len())
            .finish_non_exhaustive()
    }
}

/// Listener registration on a [`QueryObserver`].
#[must_use = "dropping the subscription keeps the listener registered forever"]
pub struct ObserverSubscription<T> {
    token: Unsubscribe<QueryObserverResult<T>>,
    core: Weak<ObserverCore<T>>,
}

impl<T> ObserverSubscription<T>
where
    T: Send + Sync + 'static,
{
    /// Removes the listener; the last one detaches the observer from its query.
    pub fn unsubscribe(self) -> bool {
        let removed = self.token.unsubscribe();
        if let Some(core) = self.core.upgrade() {
            if removed && !core.listeners.has_listeners() {
                core.detach();
            }
        }
        removed
    }
}

impl<T> std::fmt::Debug for ObserverSubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSubscription")
            .field("id", &self.token.id())
            .finish()
    }
}
