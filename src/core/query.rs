//! # Query: one cache entry, its fetch lifecycle and its observers.
//!
//! A [`Query`] is built by the [`QueryCache`](crate::QueryCache) (never directly)
//! and shared as `Arc<Query<T>>`. It owns the [`QueryState`], the handle of the
//! most recent fetch run, weak references to attached observers and a GC timer.
//!
//! ## Fetch lifecycle
//! ```text
//! fetch(options?)
//!   ├─► replace options, merge gc_time
//!   ├─► dispatch(Fetch)          → status Pending, fetch_status Fetching
//!   └─► Retryer::start(query_fn)
//!          ├─ on_fail    → RetryScheduled event (state untouched, still Pending)
//!          ├─ on_success → dispatch(Success) + schedule GC
//!          └─ on_error   → dispatch(Error)   + schedule GC
//! ```
//!
//! ## Rules
//! - Every dispatch notifies attached observers synchronously, in attach order,
//!   after the state lock is released
//! - An observer detached during a notification round is not called for the
//!   rest of that round
//! - Attaching an observer disarms GC; detaching the last one arms it
//! - When the GC timer fires with no live observers, the query removes itself
//!   from its cache (identity-guarded); every settled fetch re-arms the timer
//! - Concurrent `fetch` calls are not deduplicated; each run resolves its own
//!   outcome, but only the most recent run writes its result into the state

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::core::cache::CacheInner;
use crate::core::gc::GcTimer;
use crate::core::observer::ObserverCore;
use crate::core::retryer::{FetchOutcome, Retryer, RetryerConfig};
use crate::core::state::{Action, FetchStatus, QueryState};
use crate::error::FetchError;
use crate::events::{Bus, Event, EventKind};
use crate::key::{QueryHash, QueryKey};
use crate::queries::{QueryFnContext, QueryOptions};

struct QueryInner<T> {
    options: QueryOptions<T>,
    state: QueryState<T>,
    retryer: Option<Retryer>,
    fetch_seq: u64,
    observers: Vec<Weak<ObserverCore<T>>>,
    gc: GcTimer,
}

impl<T> QueryInner<T> {
    fn position(&self, observer: &Arc<ObserverCore<T>>) -> Option<usize> {
        self.observers
            .iter()
            .position(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(observer)))
    }

    fn live_observers(&self) -> usize {
        self.observers.iter().filter(|w| w.strong_count() > 0).count()
    }
}

/// Single cache entry.
pub struct Query<T> {
    key: QueryKey,
    hash: QueryHash,
    label: Arc<str>,
    cache: Weak<CacheInner<T>>,
    bus: Bus,
    inner: Mutex<QueryInner<T>>,
}

impl<T> Query<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(
        options: QueryOptions<T>,
        hash: QueryHash,
        cache: Weak<CacheInner<T>>,
        bus: Bus,
    ) -> Self {
        let gc = GcTimer::new(options.gc_time());
        Self {
            key: options.key().clone(),
            label: Arc::from(hash.as_str()),
            hash,
            cache,
            bus,
            inner: Mutex::new(QueryInner {
                options,
                state: QueryState::new(Instant::now()),
                retryer: None,
                fetch_seq: 0,
                observers: Vec::new(),
                gc,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueryInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Key this query was built from.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Canonical hash (cache slot) of this query.
    pub fn hash(&self) -> &QueryHash {
        &self.hash
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> QueryState<T> {
        self.lock().state.clone()
    }

    /// Current options (replaced by every `fetch(Some(..))`).
    pub fn options(&self) -> QueryOptions<T> {
        self.lock().options.clone()
    }

    /// Effective GC delay (`None` = never collected).
    pub fn gc_time(&self) -> Option<Duration> {
        self.lock().gc.gc_time()
    }

    /// True if data is absent or older than `stale_time`.
    pub fn is_stale_by_time(&self, stale_time: Duration) -> bool {
        self.lock().state.is_stale_by_time(stale_time, Instant::now())
    }

    /// True while a fetch run is in flight.
    pub fn is_fetching(&self) -> bool {
        self.lock().state.fetch_status == FetchStatus::Fetching
    }

    /// Number of attached observers.
    pub fn observer_count(&self) -> usize {
        self.lock().live_observers()
    }

    /// Starts a fetch run and returns its outcome.
    ///
    /// `options`, when given, replace the current ones. The run continues even
    /// if the returned outcome is dropped.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn fetch(self: &Arc<Self>, options: Option<QueryOptions<T>>) -> FetchOutcome<T> {
        let signal = CancellationToken::new();

        let (seq, options) = {
            let mut inner = self.lock();
            if let Some(options) = options {
                inner.gc.update_gc_time(options.gc_time());
                inner.options = options;
            } else {
                let gc_time = inner.options.gc_time();
                inner.gc.update_gc_time(gc_time);
            }
            inner.fetch_seq += 1;
            (inner.fetch_seq, inner.options.clone())
        };

        self.dispatch(Action::Fetch);
        debug!(query = %self.hash, seq, "fetch started");
        self.bus
            .publish(Event::new(EventKind::FetchStarted).with_query(self.label.clone()));

        let config = self.retryer_config(seq, &options, signal.clone());
        let query_fn = options.query_fn().clone();
        let key = self.key.clone();
        let operation = move || {
            query_fn.call(QueryFnContext {
                key: key.clone(),
                signal: signal.clone(),
            })
        };

        let (retryer, outcome) = Retryer::start(operation, config);
        {
            let mut inner = self.lock();
            if inner.fetch_seq == seq {
                inner.retryer = Some(retryer);
            }
        }
        outcome
    }

    fn retryer_config(
        self: &Arc<Self>,
        seq: u64,
        options: &QueryOptions<T>,
        signal: CancellationToken,
    ) -> RetryerConfig<T> {
        let on_success = {
            let weak = Arc::downgrade(self);
            move |data: &Arc<T>| {
                if let Some(query) = weak.upgrade() {
                    query.settle(seq, Action::Success { data: data.clone() });
                }
            }
        };
        let on_error = {
            let weak = Arc::downgrade(self);
            move |error: &FetchError| {
                if let Some(query) = weak.upgrade() {
                    query.settle(
                        seq,
                        Action::Error {
                            error: error.clone(),
                        },
                    );
                }
            }
        };
        let on_fail = {
            let bus = self.bus.clone();
            let label = self.label.clone();
            move |failure_count: u32, error: &FetchError, delay: Duration| {
                bus.publish(
                    Event::new(EventKind::RetryScheduled)
                        .with_query(label.clone())
                        .with_attempt(failure_count)
                        .with_delay(delay)
                        .with_reason(error.as_message()),
                );
            }
        };

        RetryerConfig {
            retry: options.retry(),
            retry_delay: options.retry_delay().clone(),
            abort: Some(Box::new(move || signal.cancel())),
            on_success: Some(Box::new(on_success)),
            on_error: Some(Box::new(on_error)),
            on_fail: Some(Box::new(on_fail)),
        }
    }

    fn settle(self: &Arc<Self>, seq: u64, action: Action<T>) {
        let event = match &action {
            Action::Success { .. } => {
                debug!(query = %self.hash, seq, "fetch succeeded");
                Event::new(EventKind::FetchSucceeded)
            }
            Action::Error {
                error: FetchError::Canceled,
            } => {
                debug!(query = %self.hash, seq, "fetch canceled");
                Event::new(EventKind::FetchCanceled)
            }
            Action::Error { error } => {
                debug!(query = %self.hash, seq, err = %error, "fetch failed");
                Event::new(EventKind::FetchFailed).with_reason(error.as_message())
            }
            Action::Fetch => return,
        };

        let latest = {
            let mut inner = self.lock();
            let latest = inner.fetch_seq == seq;
            if latest {
                inner.retryer = None;
            }
            latest
        };
        // A superseded run resolves its own outcome but leaves the state to the newer run.
        if latest {
            self.dispatch(action);
            self.schedule_gc();
        } else {
            trace!(query = %self.hash, seq, "superseded run settled");
        }
        self.bus.publish(event.with_query(self.label.clone()));
    }

    /// Cancels the most recent fetch run; no-op if none is running.
    pub fn cancel(&self) {
        let retryer = self.lock().retryer.clone();
        if let Some(retryer) = retryer {
            trace!(query = %self.hash, "cancel requested");
            retryer.cancel();
        }
    }

    /// Writes data as if a fetch had succeeded now.
    pub fn set_data(&self, data: Arc<T>) {
        self.dispatch(Action::Success { data });
    }

    fn dispatch(&self, action: Action<T>) {
        let observers: Vec<Arc<ObserverCore<T>>> = {
            let mut inner = self.lock();
            let now = Instant::now();
            let prev = std::mem::replace(&mut inner.state, QueryState::new(now));
            inner.state = prev.reduce(action, now);
            inner.observers.iter().filter_map(Weak::upgrade).collect()
        };

        for observer in observers {
            if self.lock().position(&observer).is_some() {
                observer.on_query_update();
            }
        }
    }

    /// Attaches an observer. Returns `false` if it was already attached.
    pub(crate) fn add_observer(&self, observer: &Arc<ObserverCore<T>>) -> bool {
        let count = {
            let mut inner = self.lock();
            if inner.position(observer).is_some() {
                return false;
            }
            inner.observers.retain(|w| w.strong_count() > 0);
            inner.observers.push(Arc::downgrade(observer));
            inner.gc.clear();
            inner.observers.len()
        };

        trace!(query = %self.hash, observers = count, "observer attached");
        self.publish_observers(EventKind::ObserverAdded, count);
        true
    }

    /// Detaches an observer. Returns `false` if it was not attached.
    pub(crate) fn remove_observer(self: &Arc<Self>, observer: &Arc<ObserverCore<T>>) -> bool {
        let count = {
            let mut inner = self.lock();
            let Some(idx) = inner.position(observer) else {
                return false;
            };
            inner.observers.remove(idx);
            inner.observers.retain(|w| w.strong_count() > 0);
            inner.observers.len()
        };

        trace!(query = %self.hash, observers = count, "observer detached");
        self.publish_observers(EventKind::ObserverRemoved, count);
        if count == 0 {
            self.schedule_gc();
        }
        true
    }

    fn publish_observers(&self, kind: EventKind, count: usize) {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.bus
            .publish(Event::new(kind).with_query(self.label.clone()).with_attempt(count));
    }

    /// Arms (or re-arms) the GC timer.
    pub(crate) fn schedule_gc(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.lock().gc.schedule(move || {
            if let Some(query) = weak.upgrade() {
                query.optional_remove();
            }
        });
    }

    /// Disarms the GC timer.
    pub(crate) fn clear_gc(&self) {
        self.lock().gc.clear();
    }

    fn optional_remove(self: &Arc<Self>) {
        if self.observer_count() > 0 {
            return;
        }
        if let Some(cache) = self.cache.upgrade() {
            if cache.remove(self) {
                debug!(query = %self.hash, "query garbage-collected");
            }
        }
    }
}

impl<T> std::fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::QueryStatus;
    use crate::core::{QueryCache, QueryObserver};
    use crate::queries::{FetchFn, QueryFnRef};
    use crate::RetryDelay;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time;

    fn counting(calls: Arc<AtomicU32>) -> QueryFnRef<u32> {
        FetchFn::arc(move |_ctx: QueryFnContext| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, FetchError>(n) }
        })
    }

    fn options(name: &str, query_fn: QueryFnRef<u32>) -> QueryOptions<u32> {
        QueryOptions::new(QueryKey::new().part(name), query_fn)
    }

    #[tokio::test(start_paused = true)]
    async fn stale_until_fetched_then_fresh_for_stale_time() {
        let cache = QueryCache::new();
        let opts = options("todos", counting(Arc::new(AtomicU32::new(0))));
        let query = cache.build(&opts);

        assert!(query.is_stale_by_time(Duration::ZERO));
        assert_eq!(query.state().status, QueryStatus::Pending);

        let data = query.fetch(None).await.unwrap();
        assert_eq!(*data, 0);

        let state = query.state();
        assert_eq!(state.status, QueryStatus::Success);
        assert_eq!(state.fetch_status, FetchStatus::Idle);
        assert!(!query.is_stale_by_time(Duration::from_secs(10)));

        time::advance(Duration::from_secs(10)).await;
        assert!(!query.is_stale_by_time(Duration::from_secs(10)));
        time::advance(Duration::from_millis(1)).await;
        assert!(query.is_stale_by_time(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_keeps_previous_data() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let query_fn: QueryFnRef<u32> = FetchFn::arc(move |_ctx: QueryFnContext| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(7)
                } else {
                    Err(FetchError::fatal("gone"))
                }
            }
        });
        let query = cache.build(&options("flaky", query_fn));

        query.fetch(None).await.unwrap();
        let err = query.fetch(None).await.unwrap_err();
        assert_eq!(err, FetchError::fatal("gone"));

        let state = query.state();
        assert_eq!(state.status, QueryStatus::Error);
        assert_eq!(state.error, Some(FetchError::fatal("gone")));
        assert_eq!(state.data.as_deref(), Some(&7));
    }

    #[tokio::test(start_paused = true)]
    async fn status_stays_pending_during_retries() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let query_fn: QueryFnRef<u32> = FetchFn::arc(move |_ctx: QueryFnContext| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(FetchError::fail("flaky"))
                } else {
                    Ok(n)
                }
            }
        });
        let opts = options("retrying", query_fn)
            .with_retry_delay(RetryDelay::Fixed(Duration::from_secs(1)));
        let query = cache.build(&opts);

        let outcome = query.fetch(None);
        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(query.state().status, QueryStatus::Pending);
        assert!(query.is_fetching());

        assert_eq!(*outcome.await.unwrap(), 2);
        assert_eq!(query.state().status, QueryStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_settles_as_canceled_error() {
        let cache = QueryCache::new();
        let signalled = Arc::new(AtomicU32::new(0));
        let s = signalled.clone();
        let query_fn: QueryFnRef<u32> = FetchFn::arc(move |ctx: QueryFnContext| {
            let s = s.clone();
            async move {
                ctx.signal.cancelled().await;
                s.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Canceled)
            }
        });
        let query = cache.build(&options("slow", query_fn));

        query.cancel();
        let outcome = query.fetch(None);
        time::sleep(Duration::from_millis(10)).await;
        query.cancel();

        assert_eq!(outcome.await.unwrap_err(), FetchError::Canceled);
        let state = query.state();
        assert_eq!(state.status, QueryStatus::Error);
        assert_eq!(state.error, Some(FetchError::Canceled));
        assert_eq!(state.fetch_status, FetchStatus::Idle);
    }

    fn timed(calls: Arc<AtomicU32>, first_ms: u64, rest_ms: u64) -> QueryFnRef<u32> {
        FetchFn::arc(move |_ctx: QueryFnContext| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let delay = if n == 0 { first_ms } else { rest_ms };
            async move {
                time::sleep(Duration::from_millis(delay)).await;
                Ok::<_, FetchError>(n)
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_fast_run_leaves_fetching_state_to_newer_run() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicU32::new(0));
        let opts = options("overlap", timed(calls.clone(), 10, 1000));
        let query = cache.build(&opts);

        let older = query.fetch(None);
        let newer = query.fetch(None);
        assert_eq!(*older.await.unwrap(), 0);

        let state = query.state();
        assert!(query.is_fetching(), "newer run is still in flight");
        assert_eq!(state.status, QueryStatus::Pending);
        assert!(state.data.is_none());

        let observer = QueryObserver::new(&cache, opts);
        let _sub = observer.subscribe(Arc::new(|_: &crate::QueryObserverResult<u32>| {}));
        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2, "attach does not start a third run");

        assert_eq!(*newer.await.unwrap(), 1);
        let state = query.state();
        assert_eq!(state.status, QueryStatus::Success);
        assert_eq!(state.data.as_deref(), Some(&1));
        assert!(!query.is_fetching());
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_slow_run_does_not_overwrite_newer_data() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicU32::new(0));
        let query = cache.build(&options("overlap", timed(calls, 1000, 10)));

        let older = query.fetch(None);
        let newer = query.fetch(None);
        assert_eq!(*newer.await.unwrap(), 1);
        let updated_at = query.state().data_updated_at;
        assert_eq!(query.state().data.as_deref(), Some(&1));

        assert_eq!(*older.await.unwrap(), 0);
        let state = query.state();
        assert_eq!(state.data.as_deref(), Some(&1));
        assert_eq!(state.data_updated_at, updated_at);
        assert_eq!(state.status, QueryStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_merges_gc_time() {
        let cache = QueryCache::new();
        let opts = options("gc", counting(Arc::new(AtomicU32::new(0))))
            .with_gc_time(Some(Duration::from_secs(10)));
        let query = cache.build(&opts);
        assert_eq!(query.gc_time(), Some(Duration::from_secs(10)));

        let shorter = opts.clone().with_gc_time(Some(Duration::from_secs(1)));
        query.fetch(Some(shorter)).await.unwrap();
        assert_eq!(query.gc_time(), Some(Duration::from_secs(10)));
        assert_eq!(query.options().gc_time(), Some(Duration::from_secs(1)));

        query.fetch(Some(opts.with_gc_time(None))).await.unwrap();
        assert_eq!(query.gc_time(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_after_gc_time_once_last_observer_detaches() {
        let cache = QueryCache::new();
        let opts = options("gc", counting(Arc::new(AtomicU32::new(0))))
            .with_gc_time(Some(Duration::from_millis(5000)))
            .with_enabled(false);
        let observer = QueryObserver::new(&cache, opts);
        let sub = observer.subscribe(Arc::new(|_: &crate::QueryObserverResult<u32>| {}));
        let query = cache.find(&QueryKey::new().part("gc")).unwrap();
        assert_eq!(query.observer_count(), 1);

        time::sleep(Duration::from_secs(60)).await;
        assert!(cache.get(query.hash()).is_some(), "observed query is kept");

        sub.unsubscribe();
        assert_eq!(query.observer_count(), 0);

        time::sleep(Duration::from_millis(4999)).await;
        assert!(cache.get(query.hash()).is_some());
        time::sleep(Duration::from_millis(2)).await;
        assert!(cache.get(query.hash()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reattach_before_gc_cancels_removal() {
        let cache = QueryCache::new();
        let opts = options("gc", counting(Arc::new(AtomicU32::new(0))))
            .with_gc_time(Some(Duration::from_millis(5000)))
            .with_enabled(false);
        let observer = QueryObserver::new(&cache, opts);
        let query = cache.find(&QueryKey::new().part("gc")).unwrap();

        let sub = observer.subscribe(Arc::new(|_: &crate::QueryObserverResult<u32>| {}));
        sub.unsubscribe();
        time::sleep(Duration::from_millis(3000)).await;

        let _sub = observer.subscribe(Arc::new(|_: &crate::QueryObserverResult<u32>| {}));
        time::sleep(Duration::from_secs(60)).await;

        let current = cache.get(query.hash()).unwrap();
        assert!(Arc::ptr_eq(&current, &query));
    }

    #[tokio::test(start_paused = true)]
    async fn unobserved_query_is_collected_after_build() {
        let cache = QueryCache::new();
        let opts = options("lonely", counting(Arc::new(AtomicU32::new(0))))
            .with_gc_time(Some(Duration::from_millis(100)));
        let query = cache.build(&opts);
        query.fetch(None).await.unwrap();

        time::sleep(Duration::from_millis(101)).await;
        assert!(!cache.has(query.key()));
    }

    #[tokio::test(start_paused = true)]
    async fn set_data_notifies_like_success() {
        let cache = QueryCache::new();
        let query = cache.build(&options("manual", counting(Arc::new(AtomicU32::new(0)))));
        query.set_data(Arc::new(42));

        let state = query.state();
        assert_eq!(state.status, QueryStatus::Success);
        assert_eq!(state.data.as_deref(), Some(&42));
        assert!(!query.is_stale_by_time(Duration::from_secs(1)));
    }
}
