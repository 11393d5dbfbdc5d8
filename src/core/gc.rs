//! # Garbage-collection timer of a query.
//!
//! [`GcTimer`] keeps the effective GC delay of one query and at most one armed
//! eviction timer. The owner decides what "eviction" means by passing a
//! closure to [`GcTimer::schedule`].
//!
//! ## Rules
//! - Scheduling always replaces (aborts) a previously armed timer
//! - `gc_time = None` never arms a timer
//! - Updating the delay keeps the larger value; `None` wins over any duration
//! - Outside a tokio runtime scheduling is skipped with a warning
//! - Dropping the timer aborts the armed task

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::warn;

#[derive(Debug)]
pub(crate) struct GcTimer {
    gc_time: Option<Duration>,
    handle: Option<JoinHandle<()>>,
}

impl GcTimer {
    pub(crate) fn new(gc_time: Option<Duration>) -> Self {
        Self {
            gc_time,
            handle: None,
        }
    }

    pub(crate) fn gc_time(&self) -> Option<Duration> {
        self.gc_time
    }

    /// Merges a new delay into the current one.
    pub(crate) fn update_gc_time(&mut self, gc_time: Option<Duration>) {
        self.gc_time = match (self.gc_time, gc_time) {
            (Some(current), Some(new)) => Some(current.max(new)),
            _ => None,
        };
    }

    /// Arms the timer; `fire` runs once the delay elapses uninterrupted.
    pub(crate) fn schedule<F>(&mut self, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.clear();
        let Some(delay) = self.gc_time else {
            return;
        };

        match Handle::try_current() {
            Ok(rt) => {
                self.handle = Some(rt.spawn(async move {
                    time::sleep(delay).await;
                    fire();
                }));
            }
            Err(_) => warn!(?delay, "no tokio runtime, gc timer not armed"),
        }
    }

    /// Disarms a pending timer, if any.
    pub(crate) fn clear(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub(crate) fn is_scheduled(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for GcTimer {
    fn drop(&mut self) {
        self.clear();
    }
}
