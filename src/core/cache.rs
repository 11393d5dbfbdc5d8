//! # Query cache: canonical hash → query registry.
//!
//! [`QueryCache`] is the only place where [`Query`] instances are constructed.
//! It maps a [`QueryHash`] to a shared `Arc<Query<T>>` and guarantees at most one
//! instance per hash at any time.
//!
//! ## Architecture
//! ```text
//! build(options) ──► hash_key(options.key)
//!                      │
//!                      ▼
//!               DashMap<QueryHash, Arc<Query<T>>>
//!                 ├─ occupied → existing instance
//!                 └─ vacant   → Query::new + insert (atomic per shard)
//!                                 └─► QueryAdded event, GC armed
//!
//! remove(&query) ──► remove_if(hash, stored is query)
//!                      └─► QueryRemoved event (only when it was the stored instance)
//! ```
//!
//! ## Rules
//! - `build` is atomic per hash: concurrent builds of one key return the same instance
//! - `remove` is identity-guarded: a stale handle never evicts a newer instance
//! - `add` never overwrites an occupied slot
//! - Cloning the cache clones a handle; all clones share one registry and one bus

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::broadcast;
use tracing::debug;

use crate::core::query::Query;
use crate::events::{Bus, Event, EventKind};
use crate::key::{QueryHash, QueryKey};
use crate::queries::QueryOptions;

pub(crate) struct CacheInner<T> {
    queries: DashMap<QueryHash, Arc<Query<T>>>,
    bus: Bus,
}

impl<T> CacheInner<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn remove(&self, query: &Arc<Query<T>>) -> bool {
        let removed = self
            .queries
            .remove_if(query.hash(), |_, stored| Arc::ptr_eq(stored, query))
            .is_some();

        if removed {
            query.clear_gc();
            debug!(query = %query.hash(), "query removed");
            self.bus
                .publish(Event::new(EventKind::QueryRemoved).with_query(query.hash().as_str()));
        }
        removed
    }
}

/// Registry of queries keyed by canonical hash.
pub struct QueryCache<T> {
    inner: Arc<CacheInner<T>>,
}

impl<T> Clone for QueryCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for QueryCache<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> QueryCache<T>
where
    T: Send + Sync + 'static,
{
    /// Creates an empty cache with its own event bus.
    pub fn new() -> Self {
        Self::with_bus(Bus::new(1024))
    }

    /// Creates an empty cache publishing to the given bus.
    pub fn with_bus(bus: Bus) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                queries: DashMap::new(),
                bus,
            }),
        }
    }

    /// Returns the query stored under `hash`.
    pub fn get(&self, hash: &QueryHash) -> Option<Arc<Query<T>>> {
        self.inner.queries.get(hash).map(|q| Arc::clone(q.value()))
    }

    /// Returns the query for `key`.
    pub fn find(&self, key: &QueryKey) -> Option<Arc<Query<T>>> {
        self.get(&key.hash())
    }

    /// True if a query is stored for `key`.
    pub fn has(&self, key: &QueryKey) -> bool {
        self.inner.queries.contains_key(&key.hash())
    }

    /// Registers `query` unless its slot is occupied. Returns `true` if inserted.
    pub fn add(&self, query: Arc<Query<T>>) -> bool {
        let inserted = match self.inner.queries.entry(query.hash().clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&query));
                true
            }
        };
        if inserted {
            self.announce(&query);
        }
        inserted
    }

    /// Returns the query for `options.key()`, constructing it if absent.
    pub fn build(&self, options: &QueryOptions<T>) -> Arc<Query<T>> {
        let hash = options.hash();
        let (query, created) = match self.inner.queries.entry(hash.clone()) {
            Entry::Occupied(slot) => (Arc::clone(slot.get()), false),
            Entry::Vacant(slot) => {
                let query = Arc::new(Query::new(
                    options.clone(),
                    hash,
                    Arc::downgrade(&self.inner),
                    self.inner.bus.clone(),
                ));
                slot.insert(Arc::clone(&query));
                (query, true)
            }
        };

        if created {
            self.announce(&query);
        }
        query
    }

    fn announce(&self, query: &Arc<Query<T>>) {
        debug!(query = %query.hash(), "query added");
        self.inner
            .bus
            .publish(Event::new(EventKind::QueryAdded).with_query(query.hash().as_str()));
        query.schedule_gc();
    }

    /// Removes `query` only if it is the instance currently stored for its hash.
    pub fn remove(&self, query: &Arc<Query<T>>) -> bool {
        self.inner.remove(query)
    }

    /// Snapshot of all stored queries (unordered).
    pub fn get_all(&self) -> Vec<Arc<Query<T>>> {
        self.inner
            .queries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Removes every stored query.
    pub fn clear(&self) {
        for query in self.get_all() {
            self.inner.remove(&query);
        }
    }

    /// Number of stored queries.
    pub fn len(&self) -> usize {
        self.inner.queries.len()
    }

    /// True if no query is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.queries.is_empty()
    }

    /// Subscribes to cache events.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.inner.bus.subscribe()
    }

    pub(crate) fn bus(&self) -> &Bus {
        &self.inner.bus
    }
}

impl<T> std::fmt::Debug for QueryCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("len", &self.inner.queries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::queries::{FetchFn, QueryFnContext};
    use serde_json::json;

    fn options(key: QueryKey) -> QueryOptions<u32> {
        QueryOptions::new(
            key,
            FetchFn::arc(|_ctx: QueryFnContext| async { Ok::<_, FetchError>(1) }),
        )
    }

    #[tokio::test]
    async fn build_returns_single_instance_per_hash() {
        let cache = QueryCache::new();
        let a = cache.build(&options(QueryKey::new().part("todos").part(json!({"a": 1, "b": 2}))));
        let b = cache.build(&options(QueryKey::new().part("todos").part(json!({"b": 2, "a": 1}))));

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert!(cache.has(a.key()));
        assert!(!cache.has(&QueryKey::new().part("other")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_builds_agree() {
        let cache = QueryCache::new();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.build(&options(QueryKey::new().part("shared"))) })
            })
            .collect();

        let mut built = Vec::new();
        for h in handles {
            built.push(h.await.unwrap());
        }
        assert!(built.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn stale_remove_keeps_newer_instance() {
        let cache = QueryCache::new();
        let key = QueryKey::new().part("race");
        let old = cache.build(&options(key.clone()));

        assert!(cache.remove(&old));
        let newer = cache.build(&options(key.clone()));
        assert!(!Arc::ptr_eq(&old, &newer));

        assert!(!cache.remove(&old), "stale removal is ignored");
        let stored = cache.find(&key).unwrap();
        assert!(Arc::ptr_eq(&stored, &newer));
    }

    #[tokio::test]
    async fn add_never_overwrites() {
        let cache = QueryCache::new();
        let key = QueryKey::new().part("slot");
        let old = cache.build(&options(key.clone()));
        cache.remove(&old);
        let newer = cache.build(&options(key.clone()));

        assert!(!cache.add(Arc::clone(&old)));
        assert!(Arc::ptr_eq(&cache.find(&key).unwrap(), &newer));

        cache.remove(&newer);
        assert!(cache.add(Arc::clone(&old)));
        assert!(Arc::ptr_eq(&cache.find(&key).unwrap(), &old));
    }

    #[tokio::test]
    async fn clear_and_events() {
        let cache = QueryCache::new();
        let mut rx = cache.events();

        cache.build(&options(QueryKey::new().part(1)));
        cache.build(&options(QueryKey::new().part(2)));
        assert_eq!(cache.get_all().len(), 2);

        cache.clear();
        assert!(cache.is_empty());

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|ev| ev.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::QueryAdded,
                EventKind::QueryAdded,
                EventKind::QueryRemoved,
                EventKind::QueryRemoved
            ]
        );
    }
}
