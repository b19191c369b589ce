//! Watcher Registry
//!
//! A watcher is a callback the store runs after every commit. The registry
//! is a pure broadcast mechanism: it performs no diffing and knows nothing
//! about state. Each callback decides for itself whether its owner needs to
//! react (see [`Subscription`](super::Subscription)).
//!
//! # Ordering
//!
//! Watchers run in insertion order. Removing one keeps the relative order of
//! the rest.
//!
//! # Re-entrancy
//!
//! [`WatcherRegistry::run`] snapshots the id list before the pass and
//! releases the lock around every callback. Callbacks may create or remove
//! watchers (their own included): a watcher removed mid-pass is skipped if
//! it has not run yet, and a watcher created mid-pass first runs on the next
//! pass.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::trace;

/// Unique identifier for a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl WatcherId {
    /// Generate a new unique watcher ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WatcherId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies whoever owns a group of watchers (a component, a subscription).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Generate a new unique owner ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

/// A watcher callback.
pub type WatcherFn = Arc<dyn Fn() + Send + Sync>;

struct Entry {
    owner: OwnerId,
    callback: WatcherFn,
}

/// Ordered set of watcher callbacks.
#[derive(Default)]
pub struct WatcherRegistry {
    entries: RwLock<IndexMap<WatcherId, Entry>>,
    passes: AtomicU64,
}

impl WatcherRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a watcher at the end of the run order.
    pub fn create<F>(&self, owner: OwnerId, callback: F) -> WatcherId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = WatcherId::new();
        self.entries.write().insert(
            id,
            Entry {
                owner,
                callback: Arc::new(callback),
            },
        );
        id
    }

    /// Remove a watcher. Returns false if it was already gone.
    pub fn remove(&self, id: WatcherId) -> bool {
        self.entries.write().shift_remove(&id).is_some()
    }

    /// Remove every watcher of `owner`. Returns how many were removed.
    pub fn remove_owner(&self, owner: OwnerId) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.owner != owner);
        before - entries.len()
    }

    /// Whether the watcher is registered.
    pub fn contains(&self, id: WatcherId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Number of registered watchers.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no watcher is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of completed passes.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Run every watcher once, in insertion order.
    pub fn run(&self) {
        let ids: Vec<WatcherId> = self.entries.read().keys().copied().collect();
        trace!(watchers = ids.len(), "watcher pass");

        for id in ids {
            // Look each one up again: it may have been removed by an earlier
            // callback in this pass.
            let callback = self
                .entries
                .read()
                .get(&id)
                .map(|entry| Arc::clone(&entry.callback));

            if let Some(callback) = callback {
                callback();
            }
        }

        self.passes.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for WatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherRegistry")
            .field("watchers", &self.len())
            .field("passes", &self.passes())
            .finish()
    }
}
