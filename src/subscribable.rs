//! # Subscribable: synchronous listener registry.
//!
//! [`Subscribable`] keeps an ordered list of listeners and invokes all of them on
//! [`broadcast`](Subscribable::broadcast), synchronously and in registration order.
//! It backs the per-observer notification path (observer → UI layer).
//!
//! ## Rules
//! - **Registration order**: listeners are called in the order they subscribed.
//! - **Identity dedup**: subscribing the same `Arc` twice keeps a single registration.
//! - **Removal during broadcast**: a listener removed while a broadcast is running
//!   is skipped for the rest of that broadcast and never called again.
//! - **Addition during broadcast**: a listener added while a broadcast is running
//!   is first called on the next broadcast.
//! - No lock is held while a listener runs, so listeners may subscribe/unsubscribe.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use queryvisor::Subscribable;
//!
//! let hub: Subscribable<u32> = Subscribable::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let s = seen.clone();
//! let unsubscribe = hub.subscribe(Arc::new(move |v: &u32| {
//!     s.fetch_add(*v as usize, Ordering::SeqCst);
//! }));
//!
//! hub.broadcast(&2);
//! unsubscribe.unsubscribe();
//! hub.broadcast(&5);
//! assert_eq!(seen.load(Ordering::SeqCst), 2);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Shared listener callback.
pub type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Stable identity of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Get the numeric value of this listener ID.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

struct Registry<A> {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener<A>)>,
}

impl<A> Registry<A> {
    fn contains(&self, id: ListenerId) -> bool {
        self.listeners.iter().any(|(lid, _)| *lid == id)
    }
}

fn lock<A>(registry: &Mutex<Registry<A>>) -> MutexGuard<'_, Registry<A>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered, identity-deduplicated set of listeners.
pub struct Subscribable<A> {
    registry: Arc<Mutex<Registry<A>>>,
}

impl<A> Default for Subscribable<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Subscribable<A> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 1,
                listeners: Vec::new(),
            })),
        }
    }

    /// Registers a listener and returns its removal token.
    ///
    /// If the very same listener (`Arc` identity) is already registered, no new
    /// registration is made and the token refers to the existing one.
    #[must_use = "dropping the token makes the listener impossible to remove"]
    pub fn subscribe(&self, listener: Listener<A>) -> Unsubscribe<A> {
        let mut registry = lock(&self.registry);

        let existing = registry
            .listeners
            .iter()
            .find(|(_, l)| same_listener(l, &listener))
            .map(|(id, _)| *id);

        let id = match existing {
            Some(id) => id,
            None => {
                let id = ListenerId(registry.next_id);
                registry.next_id += 1;
                registry.listeners.push((id, listener));
                id
            }
        };

        Unsubscribe {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Removes a listener by id. Returns `true` if it was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        remove_from(&self.registry, id)
    }

    /// True if at least one listener is registered.
    pub fn has_listeners(&self) -> bool {
        !lock(&self.registry).listeners.is_empty()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        lock(&self.registry).listeners.len()
    }

    /// True if no listener is registered.
    pub fn is_empty(&self) -> bool {
        !self.has_listeners()
    }

    /// Drops every registered listener.
    pub fn clear(&self) {
        lock(&self.registry).listeners.clear();
    }

    /// Invokes every registered listener with `arg`, synchronously, in order.
    pub fn broadcast(&self, arg: &A) {
        let snapshot: Vec<(ListenerId, Listener<A>)> = lock(&self.registry).listeners.clone();

        for (id, listener) in snapshot {
            if !lock(&self.registry).contains(id) {
                continue;
            }
            listener(arg);
        }
    }
}

fn remove_from<A>(registry: &Mutex<Registry<A>>, id: ListenerId) -> bool {
    let mut registry = lock(registry);
    match registry.listeners.iter().position(|(lid, _)| *lid == id) {
        Some(pos) => {
            registry.listeners.remove(pos);
            true
        }
        None => false,
    }
}

fn same_listener<A>(a: &Listener<A>, b: &Listener<A>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Removal token returned by [`Subscribable::subscribe`].
///
/// Holds only a weak reference to the registry: unsubscribing after the
/// registry is gone is a no-op.
pub struct Unsubscribe<A> {
    id: ListenerId,
    registry: Weak<Mutex<Registry<A>>>,
}

impl<A> Unsubscribe<A> {
    /// Identity of the registration.
    #[inline]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes the listener. Returns `true` if it was still registered.
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => remove_from(&registry, self.id),
            None => false,
        }
    }
}

impl<A> std::fmt::Debug for Unsubscribe<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe").field("id", &self.id).finish()
    }
}
