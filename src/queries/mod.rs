//! # Query definitions.
//!
//! This module provides the user-facing pieces that describe a query:
//! - [`QueryFn`] - trait for implementing async cancelable fetch functions
//! - [`FetchFn`] - closure-backed fetch function
//! - [`QueryFnRef`] - shared reference to a fetch function (`Arc<dyn QueryFn<T>>`)
//! - [`QueryFnContext`] - what a fetch function receives (key + cancellation signal)
//! - [`QueryOptions`] - key, fetch function and per-query policies

pub(crate) mod options;
mod query_fn;

pub use options::{QueryOptions, DEFAULT_GC_TIME, DEFAULT_RETRY};
pub use query_fn::{BoxFetchFuture, FetchFn, QueryFn, QueryFnContext, QueryFnRef};
