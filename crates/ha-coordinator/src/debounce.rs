//! Debouncer for coalescing bursts of calls
//!
//! Entities typically ask their coordinator for a refresh right after
//! sending a command. When several commands go out at once, those requests
//! collapse into at most one leading and one trailing run per cooldown.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

type DebouncedFunction = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static>;

#[derive(Default)]
struct DebounceState {
    timer: Option<JoinHandle<()>>,
    execute_at_end_of_timer: bool,
    shutdown: bool,
}

struct DebouncerInner {
    name: String,
    cooldown: Duration,
    immediate: bool,
    function: DebouncedFunction,
    state: Mutex<DebounceState>,
    execute_lock: tokio::sync::Mutex<()>,
}

/// Rate-limits calls to an async function
///
/// - A call while the cooldown timer runs only marks a pending run for the
///   end of the cooldown.
/// - With `immediate`, a call outside the cooldown runs right away and then
///   starts the cooldown; otherwise it starts the cooldown with a pending run.
/// - A pending run at the end of the cooldown executes and restarts the
///   cooldown.
#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<DebouncerInner>,
}

impl Debouncer {
    pub fn new<F, Fut>(name: impl Into<String>, cooldown: Duration, immediate: bool, function: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let function: DebouncedFunction = Arc::new(move || function().boxed());
        Self {
            inner: Arc::new(DebouncerInner {
                name: name.into(),
                cooldown,
                immediate,
                function,
                state: Mutex::new(DebounceState::default()),
                execute_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.inner.cooldown
    }

    /// Request a run of the debounced function
    pub async fn call(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.lock_state();
            if state.shutdown {
                debug!(debouncer = %inner.name, "Debouncer call ignored after shutdown");
                return;
            }
            if state.timer.is_some() {
                trace!(debouncer = %inner.name, "Cooldown active, deferring call");
                state.execute_at_end_of_timer = true;
                return;
            }
            if !inner.immediate {
                state.execute_at_end_of_timer = true;
                DebouncerInner::schedule_timer(inner, &mut state);
                return;
            }
        }

        let _guard = inner.execute_lock.lock().await;
        {
            // Another caller ran and started a cooldown while we waited
            let mut state = inner.lock_state();
            if state.timer.is_some() {
                state.execute_at_end_of_timer = true;
                return;
            }
            if state.shutdown {
                return;
            }
        }

        (inner.function)().await;

        let mut state = inner.lock_state();
        if !state.shutdown && state.timer.is_none() {
            DebouncerInner::schedule_timer(inner, &mut state);
        }
    }

    /// Drop the cooldown timer and any pending run
    pub fn cancel(&self) {
        let mut state = self.inner.lock_state();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.execute_at_end_of_timer = false;
    }

    /// Cancel and refuse all further calls
    pub fn shutdown(&self) {
        self.cancel();
        self.inner.lock_state().shutdown = true;
    }

    /// Whether a cooldown timer is currently running
    pub fn is_cooling_down(&self) -> bool {
        self.inner.lock_state().timer.is_some()
    }
}

impl DebouncerInner {
    fn lock_state(&self) -> MutexGuard<'_, DebounceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule_timer(this: &Arc<Self>, state: &mut DebounceState) {
        let weak = Arc::downgrade(this);
        let cooldown = this.cooldown;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_timer().await;
            }
        }));
    }

    async fn on_timer(self: Arc<Self>) {
        let _guard = {
            let mut state = self.lock_state();
            state.timer = None;
            if !state.execute_at_end_of_timer || state.shutdown {
                return;
            }
            // A run is already executing; the pending flag stays set and
            // the cooldown it starts when done picks it up
            let Ok(guard) = self.execute_lock.try_lock() else {
                trace!(debouncer = %self.name, "Run in progress, keeping call pending");
                return;
            };
            state.execute_at_end_of_timer = false;
            guard
        };

        trace!(debouncer = %self.name, "Running deferred call");
        (self.function)().await;

        let mut state = self.lock_state();
        if !state.shutdown && state.timer.is_none() {
            Self::schedule_timer(&self, &mut state);
        }
    }
}
