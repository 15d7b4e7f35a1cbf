//! Listener registry
//!
//! Progress and sync-summary notifications are fanned out to any number of
//! listeners. Registering returns a [`Subscription`] handle; dropping the
//! handle does not unsubscribe, calling [`Subscribers::unsubscribe`] does.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle identifying one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subscription(u64);

/// Set of listeners for values of type `T`
pub struct Subscribers<T> {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<u64, Listener<T>>>,
}

impl<T> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register a listener
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, Arc::new(listener));
        Subscription(id)
    }

    /// Remove a listener; returns false if it was already gone
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.lock().remove(&subscription.0).is_some()
    }

    /// Deliver a value to every listener, in registration order
    pub fn notify(&self, value: &T) {
        // Snapshot first so a listener may (un)subscribe without deadlocking.
        let listeners: Vec<Listener<T>> = self.lock().values().cloned().collect();
        for listener in listeners {
            listener(value);
        }
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Listener<T>>> {
        // A panicking listener runs outside the lock, so poisoning only
        // happens on a bug inside this module; recover the map either way.
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers").field("listeners", &self.len()).finish()
    }
}
