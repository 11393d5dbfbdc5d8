//! # Fetch functions.
//!
//! A fetch function produces the data for one query key. It receives a
//! [`QueryFnContext`] carrying the key and a [`CancellationToken`]; it may ignore
//! the token entirely, the engine does not require cooperation.
//!
//! [`FetchFn`] wraps a closure `F: Fn(QueryFnContext) -> Fut`, producing a fresh
//! future per attempt: retries never share mutable state unless the closure
//! captures an `Arc<...>` explicitly.
//!
//! ## Example
//! ```rust
//! use queryvisor::{FetchError, FetchFn, QueryFnContext, QueryFnRef};
//!
//! let f: QueryFnRef<String> = FetchFn::arc(|ctx: QueryFnContext| async move {
//!     if ctx.signal.is_cancelled() {
//!         return Err(FetchError::Canceled);
//!     }
//!     Ok::<_, FetchError>(format!("data for {}", ctx.key.hash()))
//! });
//! # let _ = f;
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::key::QueryKey;

/// Boxed future returned by a fetch function.
pub type BoxFetchFuture<T> = Pin<Box<dyn Future<Output = Result<T, FetchError>> + Send + 'static>>;

/// Shared handle to a fetch function.
pub type QueryFnRef<T> = Arc<dyn QueryFn<T>>;

/// Input of one fetch attempt.
#[derive(Clone, Debug)]
pub struct QueryFnContext {
    /// Key of the query being fetched.
    pub key: QueryKey,
    /// Cancelled when the fetch run is cancelled.
    pub signal: CancellationToken,
}

/// # Asynchronous, cancelable data source for one query.
///
/// # Example
/// ```
/// use queryvisor::{BoxFetchFuture, FetchError, QueryFn, QueryFnContext};
///
/// struct Constant(u32);
///
/// impl QueryFn<u32> for Constant {
///     fn call(&self, _ctx: QueryFnContext) -> BoxFetchFuture<u32> {
///         let v = self.0;
///         Box::pin(async move { Ok::<_, FetchError>(v) })
///     }
/// }
/// ```
pub trait QueryFn<T>: Send + Sync + 'static {
    /// Starts one fetch attempt.
    fn call(&self, ctx: QueryFnContext) -> BoxFetchFuture<T>;
}

/// Closure-backed fetch function.
pub struct FetchFn<F> {
    f: F,
}

impl<F> FetchFn<F> {
    /// Creates a new closure-backed fetch function.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the fetch function and returns it as a shared handle.
    pub fn arc<T, Fut>(f: F) -> QueryFnRef<T>
    where
        F: Fn(QueryFnContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
        T: 'static,
    {
        Arc::new(Self::new(f))
    }
}

impl<T, F, Fut> QueryFn<T> for FetchFn<F>
where
    F: Fn(QueryFnContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    T: 'static,
{
    fn call(&self, ctx: QueryFnContext) -> BoxFetchFuture<T> {
        Box::pin((self.f)(ctx))
    }
}

impl<F> std::fmt::Debug for FetchFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchFn").finish_non_exhaustive()
    }
}
