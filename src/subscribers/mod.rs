//! # Event subscribers for the query cache.
//!
//! This module provides the [`Subscribe`] trait and the [`SubscriberSet`] fan-out
//! used by [`QueryClient`](crate::QueryClient) to deliver cache [`Event`](crate::Event)s.
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Query/QueryCache ── publish(Event) ──► Bus ──► client listener ──► SubscriberSet
//!                                                                        │
//!                                                          ┌─────────────┼─────────────┐
//!                                                          ▼             ▼             ▼
//!                                                      LogWriter      Metrics        Custom
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use queryvisor::{Subscribe, Event, EventKind};
//! use async_trait::async_trait;
//!
//! struct FailureCounter;
//!
//! #[async_trait]
//! impl Subscribe for FailureCounter {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::FetchFailed {
//!             // increment failure counter
//!         }
//!     }
//! }
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
