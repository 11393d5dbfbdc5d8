//! Query engine core: cache, queries, observers and fetch lifecycle.
//!
//! Public entry points are [`QueryClient`] (process-wide handle), [`QueryCache`]
//! (hash → query registry) and [`QueryObserver`] (per-consumer view).
//!
//! Internal modules:
//! - [`retryer`]: runs one logical fetch with retries, backoff and cancellation;
//! - [`state`]: query state and its reducer;
//! - [`gc`]: per-query eviction timer;
//! - [`query`]: one cache entry, its fetch lifecycle and observer fan-out;
//! - [`cache`]: identity-guarded registry of queries;
//! - [`observer`]: derived results and listener notification;
//! - [`client`]/[`builder`]: client handle and its builder.

mod builder;
mod cache;
mod client;
mod config;
mod gc;
mod observer;
mod query;
mod retryer;
mod state;

pub use builder::QueryClientBuilder;
pub use cache::QueryCache;
pub use client::QueryClient;
pub use config::QueryConfig;
pub use observer::{ObserverSubscription, QueryObserver, QueryObserverResult};
pub use query::Query;
pub use retryer::{FetchOutcome, Retryer, RetryerConfig};
pub use state::{FetchStatus, QueryState, QueryStatus};
