//! Listener registry and fan-out
//!
//! Listeners are no-argument callbacks: after being notified they pull the
//! current data from the coordinator. The registry is safe to mutate while
//! a fan-out is running, including a listener removing itself from inside
//! its own callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::trace;

/// Callback invoked after every completed refresh cycle
pub(crate) type ListenerCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// A unique identifier for a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Listener {
    callback: ListenerCallback,
    context: Option<serde_json::Value>,
}

/// Concurrent set of listeners for one coordinator
pub(crate) struct ListenerRegistry {
    listeners: DashMap<ListenerId, Listener>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback, returning its id and the listener count after insertion
    pub(crate) fn add(
        &self,
        callback: ListenerCallback,
        context: Option<serde_json::Value>,
    ) -> (ListenerId, usize) {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.insert(id, Listener { callback, context });
        (id, self.listeners.len())
    }

    /// Remove a listener, returning the remaining count if it was present
    pub(crate) fn remove(&self, id: ListenerId) -> Option<usize> {
        self.listeners
            .remove(&id)
            .map(|_| self.listeners.len())
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub(crate) fn contexts(&self) -> Vec<serde_json::Value> {
        self.listeners
            .iter()
            .filter_map(|entry| entry.value().context.clone())
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.listeners.clear();
    }

    /// Invoke every registered listener once, sequentially
    ///
    /// Callbacks are collected first so no map shard is locked while user
    /// code runs; membership is re-checked right before each call so a
    /// listener removed mid fan-out is skipped.
    pub(crate) fn notify_all(&self) -> usize {
        let mut snapshot: Vec<(ListenerId, ListenerCallback)> = self
            .listeners
            .iter()
            .map(|entry| (*entry.key(), entry.value().callback.clone()))
            .collect();
        snapshot.sort_by_key(|(id, _)| *id);

        let mut notified = 0;
        for (id, callback) in snapshot {
            if !self.listeners.contains_key(&id) {
                trace!(?id, "Listener removed during fan-out, skipping");
                continue;
            }
            callback();
            notified += 1;
        }
        notified
    }
}

/// Something listeners can be removed from
pub(crate) trait RemoveListener: Send + Sync {
    fn remove_listener(&self, id: ListenerId);
}

/// Capability to unregister a listener
///
/// Removal is explicit: dropping the handle keeps the listener registered.
/// `remove` is idempotent and may be called from inside the listener's own
/// callback.
#[must_use = "dropping the handle leaves the listener registered with no way to remove it"]
#[derive(Clone)]
pub struct ListenerHandle {
    id: ListenerId,
    owner: Weak<dyn RemoveListener>,
}

impl ListenerHandle {
    pub(crate) fn new(id: ListenerId, owner: Weak<dyn RemoveListener>) -> Self {
        Self { id, owner }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Unregister the listener
    pub fn remove(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.remove_listener(self.id);
        }
    }

    /// Turn the handle into a one-shot unload callback
    pub fn into_callback(self) -> impl FnOnce() + Send + 'static {
        move || self.remove()
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}
