//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the cache, queries and subscriber workers.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `QueryCache` (added/removed), `Query` (observers, fetch lifecycle),
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `QueryClient`'s listener (fans out to `SubscriberSet`) and anyone
//!   holding a receiver from [`QueryCache::events`](crate::QueryCache::events).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
