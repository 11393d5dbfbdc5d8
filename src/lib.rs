//! # queryvisor
//!
//! **Queryvisor** is an asynchronous query cache for Rust.
//!
//! Given logical *queries* (a structured key plus a function that fetches the
//! data for that key), it caches results under a canonical hash of the key,
//! tracks staleness over time, retries failed fetches with backoff and notifies
//! any number of independent observers when a query's state changes.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//!   │ QueryObserver│  │ QueryObserver│  │ QueryObserver│   per-consumer views
//!   │ (listeners)  │  │ (listeners)  │  │ (listeners)  │   (Subscribable)
//!   └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!          │ attach/detach   │                 │
//!          ▼                 ▼                 ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │  QueryCache (DashMap<QueryHash, Arc<Query>>)                  │
//! │  - build(options): find-or-create, one instance per hash      │
//! │  - remove(query):  identity-guarded                           │
//! └──────┬──────────────────────────────┬─────────────────────────┘
//!        ▼                              ▼
//!   ┌──────────────┐              ┌──────────────┐
//!   │    Query     │              │    Query     │
//!   │ state + GC   │              │ state + GC   │
//!   └──────┬───────┘              └──────┬───────┘
//!          │ fetch()                     │
//!          ▼                             ▼
//!   ┌──────────────┐              ┌──────────────┐
//!   │   Retryer    │              │   Retryer    │
//!   │ (retry loop) │              │ (retry loop) │
//!   └──────┬───────┘              └──────┬───────┘
//!          │ Publishes events: QueryAdded, FetchStarted,
//!          │ RetryScheduled, FetchSucceeded, FetchFailed, ...
//!          ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │                 Bus (broadcast channel)                       │
//! │              (capacity: QueryConfig::bus_capacity)            │
//! └──────────────────────────────┬────────────────────────────────┘
//!                                ▼
//!                    subscriber listener ──► SubscriberSet ──► workers ──► on_event()
//! ```
//!
//! ### Lifecycle
//! ```text
//! observer.subscribe(listener)
//!   └─► query.add_observer        (GC disarmed)
//!   └─► stale && enabled && idle? → query.fetch()
//!           ├─► dispatch(Fetch)    → observers notified (Pending, Fetching)
//!           └─► Retryer loop
//!                 ├─ Ok          → dispatch(Success) → observers notified, GC armed
//!                 ├─ retryable   → sleep(retry_delay(failures)) → retry
//!                 └─ terminal    → dispatch(Error)   → observers notified, GC armed
//! subscription.unsubscribe()
//!   └─► query.remove_observer     (last one arms GC → query leaves the cache)
//! ```
//!
//! ## Features
//! | Area              | Description                                                      | Key types / traits                              |
//! |-------------------|------------------------------------------------------------------|-------------------------------------------------|
//! | **Keys**          | Structured keys, order-insensitive canonical hashing.            | [`QueryKey`], [`QueryHash`], [`hash_key`]       |
//! | **Queries**       | Fetch functions and per-query policies.                          | [`QueryFn`], [`FetchFn`], [`QueryOptions`]      |
//! | **Cache**         | Deduplicated registry, state machine, GC.                        | [`QueryCache`], [`Query`], [`QueryState`]       |
//! | **Observers**     | Derived results, change-only notifications.                      | [`QueryObserver`], [`QueryObserverResult`]      |
//! | **Retries**       | Retry loop with cancellable backoff.                             | [`Retryer`], [`RetryDelay`], [`BackoffPolicy`]  |
//! | **Subscriber API**| Hook into cache events (logging, metrics, custom subscribers).   | [`Subscribe`], [`Event`]                        |
//! | **Errors**        | Typed errors for fetches and keys.                               | [`FetchError`], [`KeyError`]                    |
//! | **Configuration** | Client-wide defaults.                                            | [`QueryConfig`], [`QueryClient`]                |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use queryvisor::{FetchError, FetchFn, QueryClient, QueryConfig, QueryFnContext, QueryKey, QueryObserverResult};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     // Build subscribers (optional)
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn queryvisor::Subscribe>> = vec![Arc::new(queryvisor::LogWriter::default())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn queryvisor::Subscribe>> = Vec::new();
//!
//!     let client = QueryClient::builder(QueryConfig::default())
//!         .with_subscribers(subs)
//!         .build();
//!
//!     let todos = client
//!         .options(
//!             QueryKey::new().part("todos").part(serde_json::json!({ "page": 1 })),
//!             FetchFn::arc(|ctx: QueryFnContext| async move {
//!                 if ctx.signal.is_cancelled() {
//!                     return Err(FetchError::Canceled);
//!                 }
//!                 Ok(vec!["write docs".to_string()])
//!             }),
//!         )
//!         .with_stale_time(Duration::from_secs(30));
//!
//!     let observer = client.observer(todos);
//!     let subscription = observer.subscribe(Arc::new(|r: &QueryObserverResult<Vec<String>>| {
//!         println!("status={:?} data={:?}", r.status, r.data);
//!     }));
//!
//!     let data = observer.refetch().await.expect("fetch");
//!     assert_eq!(data.len(), 1);
//!
//!     subscription.unsubscribe();
//!     client.shutdown().await;
//! }
//! ```
mod core;
mod error;
mod events;
mod key;
mod policies;
mod queries;
mod subscribable;
mod subscribers;

// ---- Public re-exports ----

pub use crate::core::{
    FetchOutcome, FetchStatus, ObserverSubscription, Query, QueryCache, QueryClient,
    QueryClientBuilder, QueryConfig, QueryObserver, QueryObserverResult, QueryState, QueryStatus,
    Retryer, RetryerConfig,
};
pub use error::{FetchError, KeyError};
pub use events::{Bus, Event, EventKind};
pub use key::{hash_key, QueryHash, QueryKey};
pub use policies::{BackoffPolicy, JitterPolicy, RetryDelay};
pub use queries::{
    BoxFetchFuture, FetchFn, QueryFn, QueryFnContext, QueryFnRef, QueryOptions, DEFAULT_GC_TIME,
    DEFAULT_RETRY,
};
pub use subscribable::{Listener, ListenerId, Subscribable, Unsubscribe};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
