//! # LogWriter: tracing-backed event writer
//!
//! A minimal subscriber that renders incoming [`Event`]s through `tracing`.
//! Install any `tracing` subscriber to see the output.
//!
//! ## Example output
//! ```text
//! DEBUG queryvisor: query added query=["todos"]
//! DEBUG queryvisor: fetch started query=["todos"]
//!  WARN queryvisor: retry scheduled query=["todos"] failures=1 delay_ms=1000 err="fetch failed: refused"
//!  INFO queryvisor: fetch succeeded query=["todos"]
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let query = e.query.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::QueryAdded => debug!(seq = e.seq, query, "query added"),
            EventKind::QueryRemoved => debug!(seq = e.seq, query, "query removed"),
            EventKind::ObserverAdded => {
                debug!(seq = e.seq, query, observers = ?e.attempt, "observer added")
            }
            EventKind::ObserverRemoved => {
                debug!(seq = e.seq, query, observers = ?e.attempt, "observer removed")
            }
            EventKind::FetchStarted => debug!(seq = e.seq, query, "fetch started"),
            EventKind::RetryScheduled => warn!(
                seq = e.seq,
                query,
                failures = ?e.attempt,
                delay_ms = ?e.delay_ms,
                err = reason,
                "retry scheduled"
            ),
            EventKind::FetchSucceeded => info!(seq = e.seq, query, "fetch succeeded"),
            EventKind::FetchFailed => error!(seq = e.seq, query, err = reason, "fetch failed"),
            EventKind::FetchCanceled => info!(seq = e.seq, query, "fetch cancelled"),
            EventKind::SubscriberOverflow => {
                warn!(seq = e.seq, subscriber = query, reason, "subscriber overflow")
            }
            EventKind::SubscriberPanicked => {
                error!(seq = e.seq, subscriber = query, info = reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
