//! # Runtime events emitted by the query cache.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Cache events**: queries entering/leaving the cache, observers attaching/detaching
//! - **Fetch events**: fetch lifecycle (started, retry scheduled, succeeded, failed, cancelled)
//! - **Subscriber events**: subscriber worker overflow and panics
//!
//! The [`Event`] struct carries additional metadata such as timestamps, the query
//! hash, attempt numbers, reasons and backoff delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use queryvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RetryScheduled)
//!     .with_query(r#"["todos"]"#)
//!     .with_reason("connection refused")
//!     .with_attempt(2)
//!     .with_delay(Duration::from_secs(2));
//!
//! assert_eq!(ev.kind, EventKind::RetryScheduled);
//! assert_eq!(ev.query.as_deref(), Some(r#"["todos"]"#));
//! assert_eq!(ev.delay_ms, Some(2000));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Cache events ===
    /// A new query was built and registered in the cache.
    ///
    /// Sets:
    /// - `query`: query hash
    QueryAdded,

    /// A query was removed from the cache (explicitly, by GC, or by `clear`).
    ///
    /// Sets:
    /// - `query`: query hash
    QueryRemoved,

    /// An observer attached to a query.
    ///
    /// Sets:
    /// - `query`: query hash
    /// - `attempt`: observer count after attaching
    ObserverAdded,

    /// An observer detached from a query.
    ///
    /// Sets:
    /// - `query`: query hash
    /// - `attempt`: observer count after detaching
    ObserverRemoved,

    // === Fetch lifecycle events ===
    /// A fetch run started (status moved to `pending`).
    ///
    /// Sets:
    /// - `query`: query hash
    FetchStarted,

    /// An attempt failed and a retry is scheduled.
    ///
    /// Sets:
    /// - `query`: query hash
    /// - `attempt`: failure count so far (1-based)
    /// - `delay_ms`: delay before the next attempt (ms)
    /// - `reason`: failure message
    RetryScheduled,

    /// A fetch run settled with data.
    ///
    /// Sets:
    /// - `query`: query hash
    FetchSucceeded,

    /// A fetch run settled with a terminal error.
    ///
    /// Sets:
    /// - `query`: query hash
    /// - `reason`: error message
    FetchFailed,

    /// A fetch run was cancelled.
    ///
    /// Sets:
    /// - `query`: query hash
    FetchCanceled,

    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `query`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `query`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Query hash (or subscriber name for subscriber events).
    pub query: Option<Arc<str>>,
    /// Attempt/failure count or observer count, depending on the kind.
    pub attempt: Option<u32>,
    /// Retry delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            query: None,
            attempt: None,
            delay_ms: None,
            reason: None,
        }
    }

    /// Attaches a query hash.
    #[inline]
    pub fn with_query(mut self, query: impl Into<Arc<str>>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a retry delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_query(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_query(subscriber)
            .with_reason(info)
    }

    /// True for fetch lifecycle events.
    #[inline]
    pub fn is_fetch_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::FetchStarted
                | EventKind::RetryScheduled
                | EventKind::FetchSucceeded
                | EventKind::FetchFailed
                | EventKind::FetchCanceled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::QueryAdded);
        let b = Event::new(EventKind::QueryRemoved);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn delay_saturates() {
        let ev = Event::new(EventKind::RetryScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }

    #[test]
    fn subscriber_helpers() {
        let ev = Event::subscriber_overflow("log", "full");
        assert_eq!(ev.kind, EventKind::SubscriberOverflow);
        assert_eq!(ev.query.as_deref(), Some("log"));
        assert_eq!(ev.reason.as_deref(), Some("subscriber=log reason=full"));
        assert!(!ev.is_fetch_event());
        assert!(Event::new(EventKind::FetchFailed).is_fetch_event());
    }
}
