//! # Query state and its reducer.
//!
//! [`QueryState`] is the single cache entry owned by a [`Query`](crate::Query).
//! It changes only through [`Action`]s applied by the query's dispatch.
//!
//! ## Transitions
//! ```text
//!            fetch                       success(data)
//! Pending ─────────► Pending/Fetching ──────────────► Success (data set, error cleared)
//! Success ─────────►        │
//! Error   ─────────►        │          error(err)
//!                           └─────────────────────────► Error   (error set, data kept)
//! ```
//!
//! ## Rules
//! - `Success` ⇒ data present, error absent
//! - `Error` ⇒ error present
//! - `Pending` may still carry data from an earlier success (refetch)

use std::sync::Arc;

use tokio::time::Instant;

use crate::error::FetchError;

/// Result status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// No settled result yet, or a refetch is running.
    Pending,
    /// Last fetch produced data.
    Success,
    /// Last fetch failed terminally.
    Error,
}

/// Whether a fetch run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// A fetch run has started and not settled.
    Fetching,
    /// No fetch run is in flight.
    Idle,
}

/// State of one cache entry.
#[derive(Debug)]
pub struct QueryState<T> {
    /// Last successfully fetched data.
    pub data: Option<Arc<T>>,
    /// Last terminal error.
    pub error: Option<FetchError>,
    /// Result status.
    pub status: QueryStatus,
    /// In-flight marker.
    pub fetch_status: FetchStatus,
    /// When `data` was last written (construction time until then).
    pub data_updated_at: Instant,
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            error: self.error.clone(),
            status: self.status,
            fetch_status: self.fetch_status,
            data_updated_at: self.data_updated_at,
        }
    }
}

impl<T> QueryState<T> {
    /// Initial state: pending, idle, no data.
    pub fn new(now: Instant) -> Self {
        Self {
            data: None,
            error: None,
            status: QueryStatus::Pending,
            fetch_status: FetchStatus::Idle,
            data_updated_at: now,
        }
    }

    /// True when no data is present or it is older than `stale_time`.
    ///
    /// A stale time too large to add to the timestamp never goes stale.
    pub fn is_stale_by_time(&self, stale_time: std::time::Duration, now: Instant) -> bool {
        if self.data.is_none() {
            return true;
        }
        match self.data_updated_at.checked_add(stale_time) {
            Some(fresh_until) => fresh_until < now,
            None => false,
        }
    }

    /// Applies an action and returns the next state.
    pub(crate) fn reduce(self, action: Action<T>, now: Instant) -> Self {
        match action {
            Action::Fetch => Self {
                status: QueryStatus::Pending,
                fetch_status: FetchStatus::Fetching,
                ..self
            },
            Action::Success { data } => Self {
                data: Some(data),
                error: None,
                status: QueryStatus::Success,
                fetch_status: FetchStatus::Idle,
                data_updated_at: now,
            },
            Action::Error { error } => Self {
                error: Some(error),
                status: QueryStatus::Error,
                fetch_status: FetchStatus::Idle,
                ..self
            },
        }
    }
}

/// Internal state transition.
pub(crate) enum Action<T> {
    Fetch,
    Success { data: Arc<T> },
    Error { error: FetchError },
}
