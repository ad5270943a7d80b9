//! Owning-integration side of the coordinator lifecycle
//!
//! A coordinator never talks to the config entry subsystem directly. It
//! reports credential failures through [`ReauthHandler`], and the host tears
//! it down through the unload callbacks collected on an [`EntryScope`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use ulid::Ulid;

/// Receives authentication failures from coordinators
///
/// Implemented by whatever owns the integration instance; it is expected to
/// start a re-authentication flow and stop relying on the coordinator until
/// credentials are refreshed.
pub trait ReauthHandler: Send + Sync {
    fn start_reauth(&self, coordinator: &str, reason: &str);
}

impl<F> ReauthHandler for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn start_reauth(&self, coordinator: &str, reason: &str) {
        self(coordinator, reason)
    }
}

type UnloadCallback = Box<dyn FnOnce() + Send + 'static>;

/// One loaded integration instance, as seen by its coordinators
///
/// Collects teardown callbacks (listener removals, coordinator stops) that
/// run when the instance is unloaded, and tracks whether a
/// re-authentication has been requested.
pub struct EntryScope {
    entry_id: String,
    domain: String,
    title: String,
    on_unload: Mutex<Vec<UnloadCallback>>,
    reauth_requested: AtomicBool,
    reauth_reason: Mutex<Option<String>>,
}

impl EntryScope {
    /// Create a scope with a fresh ULID entry id
    pub fn new(domain: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            entry_id: Ulid::new().to_string(),
            domain: domain.into(),
            title: title.into(),
            on_unload: Mutex::new(Vec::new()),
            reauth_requested: AtomicBool::new(false),
            reauth_reason: Mutex::new(None),
        }
    }

    pub fn with_entry_id(mut self, entry_id: impl Into<String>) -> Self {
        self.entry_id = entry_id.into();
        self
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Register a callback to run when the entry is unloaded
    pub fn on_unload(&self, callback: impl FnOnce() + Send + 'static) {
        lock(&self.on_unload).push(Box::new(callback));
    }

    /// Number of pending unload callbacks
    pub fn pending_unload_callbacks(&self) -> usize {
        lock(&self.on_unload).len()
    }

    /// Run all unload callbacks, most recently registered first
    ///
    /// Returns how many callbacks ran. Callbacks registered while unloading
    /// are kept for the next unload.
    pub fn unload(&self) -> usize {
        let callbacks = std::mem::take(&mut *lock(&self.on_unload));
        let count = callbacks.len();
        for callback in callbacks.into_iter().rev() {
            callback();
        }
        info!(
            entry_id = %self.entry_id,
            domain = %self.domain,
            "Unloaded entry {} ({} callbacks)",
            self.title,
            count
        );
        count
    }

    pub fn reauth_requested(&self) -> bool {
        self.reauth_requested.load(Ordering::SeqCst)
    }

    /// Reason given by the coordinator that requested re-authentication
    pub fn reauth_reason(&self) -> Option<String> {
        lock(&self.reauth_reason).clone()
    }

    /// Mark credentials as refreshed
    pub fn clear_reauth(&self) {
        self.reauth_requested.store(false, Ordering::SeqCst);
        lock(&self.reauth_reason).take();
        debug!(entry_id = %self.entry_id, "Re-authentication cleared");
    }
}

impl ReauthHandler for EntryScope {
    fn start_reauth(&self, coordinator: &str, reason: &str) {
        if self.reauth_requested.swap(true, Ordering::SeqCst) {
            debug!(
                entry_id = %self.entry_id,
                coordinator,
                "Re-authentication already requested"
            );
            return;
        }
        *lock(&self.reauth_reason) = Some(reason.to_string());
        warn!(
            entry_id = %self.entry_id,
            domain = %self.domain,
            coordinator,
            "Entry {} needs re-authentication: {}",
            self.title,
            reason
        );
    }
}

impl std::fmt::Debug for EntryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryScope")
            .field("entry_id", &self.entry_id)
            .field("domain", &self.domain)
            .field("title", &self.title)
            .field("reauth_requested", &self.reauth_requested())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_entry_ids_are_unique() {
        let a = EntryScope::new("shelly", "Kitchen plug");
        let b = EntryScope::new("shelly", "Kitchen plug");
        assert_ne!(a.entry_id(), b.entry_id());
        assert_eq!(a.domain(), "shelly");
        assert_eq!(a.title(), "Kitchen plug");
    }

    #[test]
    fn test_with_entry_id() {
        let entry = EntryScope::new("airzone", "Airzone").with_entry_id("01ABC");
        assert_eq!(entry.entry_id(), "01ABC");
    }

    #[test]
    fn test_unload_runs_callbacks_in_reverse_order() {
        let entry = EntryScope::new("yolink", "YoLink");
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 1..=3 {
            let order = order.clone();
            entry.on_unload(move || order.lock().unwrap().push(n));
        }
        assert_eq!(entry.pending_unload_callbacks(), 3);

        assert_eq!(entry.unload(), 3);
        assert_eq!(*order.lock().unwrap(), vec![3, 2, 1]);

        // Callbacks run only once
        assert_eq!(entry.unload(), 0);
    }

    #[test]
    fn test_reauth_is_deduplicated() {
        let entry = EntryScope::new("bmw", "My BMW");
        assert!(!entry.reauth_requested());

        entry.start_reauth("bmw account", "token expired");
        entry.start_reauth("bmw account", "token still expired");

        assert!(entry.reauth_requested());
        assert_eq!(entry.reauth_reason().as_deref(), Some("token expired"));

        entry.clear_reauth();
        assert!(!entry.reauth_requested());
        assert_eq!(entry.reauth_reason(), None);

        entry.start_reauth("bmw account", "password changed");
        assert_eq!(entry.reauth_reason().as_deref(), Some("password changed"));
    }

    #[test]
    fn test_closure_reauth_handler() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let handler = move |coordinator: &str, reason: &str| {
            seen.lock()
                .unwrap()
                .push(format!("{coordinator}: {reason}"));
        };

        handler.start_reauth("roborock", "invalid credentials");
        assert_eq!(*calls.lock().unwrap(), vec!["roborock: invalid credentials"]);
    }
}
