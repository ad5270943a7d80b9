//! The data update coordinator
//!
//! One coordinator per monitored resource (a device or a cloud account).
//! It owns the last known good payload, runs at most one fetch at a time,
//! classifies failures and tells every listener when a refresh cycle has
//! completed.
//!
//! ```text
//! Idle ──▶ Fetching ──▶ success ──▶ Idle
//!                   ├─▶ failure ──▶ Idle (stale data kept)
//!                   └─▶ auth    ──▶ AuthFailed (scheduled ticks skip the fetch)
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, error, info, trace, warn};

use crate::config::CoordinatorConfig;
use crate::debounce::Debouncer;
use crate::entry::ReauthHandler;
use crate::error::{RefreshError, SetupError};
use crate::listeners::{
    ListenerCallback, ListenerHandle, ListenerId, ListenerRegistry, RemoveListener,
};
use crate::schedule::PeriodicTrigger;
use crate::update::{fetch_with_timeout, UpdateMethod};

/// Default bound on a single fetch
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cooldown for debounced refresh requests
pub const REQUEST_REFRESH_DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

type SharedRefresh<D> = Shared<BoxFuture<'static, Result<D, RefreshError>>>;

/// Where the coordinator is in its refresh cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinatorPhase {
    /// No fetch running
    #[default]
    Idle,
    /// A fetch is in flight
    Fetching,
    /// Last cycle was rejected by the service; waiting for re-authentication
    AuthFailed,
}

/// What started a refresh cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshKind {
    Scheduled,
    Requested,
    FirstRefresh,
}

/// Consistent snapshot of the coordinator's published state
///
/// All fields are written together under one lock at the end of a cycle,
/// so a snapshot never mixes two cycles.
#[derive(Debug, Clone)]
pub struct CoordinatorState<D> {
    /// Most recent successfully fetched payload
    pub data: Option<D>,
    /// True only when the last cycle succeeded
    pub last_update_success: bool,
    /// Failure of the last cycle, cleared on success
    pub last_exception: Option<RefreshError>,
    /// When data was last replaced
    pub last_update_success_time: Option<DateTime<Utc>>,
    /// Where the refresh cycle currently is
    pub phase: CoordinatorPhase,
}

impl<D> Default for CoordinatorState<D> {
    fn default() -> Self {
        Self {
            data: None,
            last_update_success: false,
            last_exception: None,
            last_update_success_time: None,
            phase: CoordinatorPhase::Idle,
        }
    }
}

/// Builder for [`DataUpdateCoordinator`]
pub struct CoordinatorBuilder<D> {
    name: String,
    update_interval: Option<Duration>,
    timeout: Duration,
    request_refresh_cooldown: Duration,
    request_refresh_immediate: bool,
    reauth: Option<Arc<dyn ReauthHandler>>,
    _data: std::marker::PhantomData<fn() -> D>,
}

impl<D> CoordinatorBuilder<D>
where
    D: Clone + Send + Sync + 'static,
{
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            update_interval: None,
            timeout: DEFAULT_TIMEOUT,
            request_refresh_cooldown: REQUEST_REFRESH_DEFAULT_COOLDOWN,
            request_refresh_immediate: true,
            reauth: None,
            _data: std::marker::PhantomData,
        }
    }

    /// Take every setting from a loaded config
    pub fn with_config(mut self, config: &CoordinatorConfig) -> Self {
        self.name = config.name.clone();
        self.update_interval = config.update_interval();
        self.timeout = config.timeout_duration();
        self.request_refresh_cooldown = config.request_refresh_cooldown_duration();
        self.request_refresh_immediate = config.request_refresh_immediate;
        self
    }

    /// Poll on this interval; a zero interval means on-demand only
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Bound a single fetch; a slower fetch counts as failed
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cooldown and leading-edge behaviour for debounced refresh requests
    pub fn with_request_refresh_debounce(mut self, cooldown: Duration, immediate: bool) -> Self {
        self.request_refresh_cooldown = cooldown;
        self.request_refresh_immediate = immediate;
        self
    }

    /// Where authentication failures are reported
    pub fn with_reauth_handler(mut self, handler: Arc<dyn ReauthHandler>) -> Self {
        self.reauth = Some(handler);
        self
    }

    /// Bind the update method and create the coordinator
    pub fn build(self, update_method: impl UpdateMethod<D> + 'static) -> DataUpdateCoordinator<D> {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner<D>>| {
            let owner = weak.clone();
            let debouncer = Debouncer::new(
                format!("{} refresh", self.name),
                self.request_refresh_cooldown,
                self.request_refresh_immediate,
                move || {
                    let owner = owner.clone();
                    async move {
                        if let Some(inner) = owner.upgrade() {
                            let _ = Inner::refresh(&inner, RefreshKind::Requested).await;
                        }
                    }
                },
            );

            Inner {
                name: self.name,
                update_interval: self.update_interval,
                timeout: self.timeout,
                update_method: Box::new(update_method),
                reauth: self.reauth,
                state: RwLock::new(CoordinatorState::default()),
                listeners: ListenerRegistry::new(),
                in_flight: Mutex::new(None),
                trigger: Mutex::new(None),
                debouncer,
                shutdown: AtomicBool::new(false),
            }
        });

        debug!(
            coordinator = %inner.name,
            interval = ?inner.update_interval,
            timeout = ?inner.timeout,
            "Created coordinator"
        );
        DataUpdateCoordinator { inner }
    }
}

struct Inner<D> {
    name: String,
    update_interval: Option<Duration>,
    timeout: Duration,
    update_method: Box<dyn UpdateMethod<D>>,
    reauth: Option<Arc<dyn ReauthHandler>>,
    state: RwLock<CoordinatorState<D>>,
    listeners: ListenerRegistry,
    in_flight: Mutex<Option<SharedRefresh<D>>>,
    trigger: Mutex<Option<PeriodicTrigger>>,
    debouncer: Debouncer,
    shutdown: AtomicBool,
}

/// Polls one data source and fans results out to listeners
///
/// Cloning is cheap and every clone drives the same coordinator.
pub struct DataUpdateCoordinator<D> {
    inner: Arc<Inner<D>>,
}

impl<D> Clone for DataUpdateCoordinator<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D> DataUpdateCoordinator<D>
where
    D: Clone + Send + Sync + 'static,
{
    /// Start building a coordinator with the given name
    pub fn builder(name: impl Into<String>) -> CoordinatorBuilder<D> {
        CoordinatorBuilder::new(name)
    }

    /// Shorthand for a coordinator with default debounce and no re-auth handler
    pub fn new(
        name: impl Into<String>,
        update_interval: Option<Duration>,
        timeout: Duration,
        update_method: impl UpdateMethod<D> + 'static,
    ) -> Self {
        let mut builder = Self::builder(name).with_timeout(timeout);
        if let Some(interval) = update_interval {
            builder = builder.with_update_interval(interval);
        }
        builder.build(update_method)
    }

    /// Name used in logs and re-auth requests
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Polling interval, `None` for on-demand sources
    pub fn update_interval(&self) -> Option<Duration> {
        self.inner.update_interval
    }

    /// Bound on a single fetch
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Run one refresh cycle and return its outcome
    ///
    /// If a cycle is already in flight, waits for it and returns its outcome
    /// instead of fetching again.
    pub async fn async_refresh(&self) -> Result<D, RefreshError> {
        Inner::refresh(&self.inner, RefreshKind::Requested).await
    }

    /// Refresh now, sharing any in-flight cycle
    pub async fn request_refresh(&self) -> Result<D, RefreshError> {
        Inner::refresh(&self.inner, RefreshKind::Requested).await
    }

    /// Ask for a refresh through the request debouncer
    ///
    /// Bursts of requests within the cooldown collapse into at most one
    /// trailing refresh. The outcome is only visible through the published
    /// state.
    pub async fn request_refresh_debounced(&self) {
        self.inner.debouncer.call().await;
    }

    /// First refresh while setting up the owning entry
    ///
    /// Authentication failures are returned to the caller instead of going
    /// to the re-auth handler; any other failure means the entry is not
    /// ready yet. On success the periodic refresh is scheduled.
    pub async fn first_refresh(&self) -> Result<(), SetupError> {
        match Inner::refresh(&self.inner, RefreshKind::FirstRefresh).await {
            Ok(_) => {
                self.inner.schedule_refresh();
                Ok(())
            }
            Err(err) => {
                debug!(coordinator = %self.inner.name, error = %err, "First refresh failed");
                Err(SetupError::from(err))
            }
        }
    }

    /// Publish data pushed by the source, bypassing the update method
    ///
    /// Counts as a successful cycle: replaces data, clears the error,
    /// pushes the next scheduled poll a full interval out and notifies
    /// listeners.
    pub fn set_updated_data(&self, data: D) {
        {
            let mut state = self.inner.write_state();
            state.data = Some(data);
            state.last_update_success = true;
            state.last_exception = None;
            state.last_update_success_time = Some(Utc::now());
            if state.phase != CoordinatorPhase::Fetching {
                state.phase = CoordinatorPhase::Idle;
            }
        }
        if let Some(trigger) = self.inner.lock_trigger().as_ref() {
            trigger.reset();
        }
        debug!(
            coordinator = %self.inner.name,
            listeners = self.inner.listeners.len(),
            "Manually updated {} data",
            self.inner.name
        );
        self.inner.listeners.notify_all();
    }

    /// Notify every listener without touching data
    pub fn update_listeners(&self) {
        self.inner.listeners.notify_all();
    }

    /// Register a listener called after every completed cycle
    ///
    /// The first listener starts the periodic refresh; removing the last one
    /// stops it.
    pub fn add_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(Arc::new(callback), None)
    }

    /// Register a listener tagged with a context value
    ///
    /// Contexts let the coordinator tell which parts of a payload are in use,
    /// e.g. the entity ids currently subscribed.
    pub fn add_listener_with_context<F>(&self, callback: F, context: serde_json::Value) -> ListenerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(Arc::new(callback), Some(context))
    }

    fn register(&self, callback: ListenerCallback, context: Option<serde_json::Value>) -> ListenerHandle {
        let (id, count) = self.inner.listeners.add(callback, context);
        trace!(coordinator = %self.inner.name, ?id, count, "Listener added");
        self.inner.schedule_refresh();

        let owner: Weak<dyn RemoveListener> = Arc::downgrade(&self.inner) as Weak<dyn RemoveListener>;
        ListenerHandle::new(id, owner)
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Contexts of all listeners registered with one
    pub fn listener_contexts(&self) -> Vec<serde_json::Value> {
        self.inner.listeners.contexts()
    }

    /// Stop scheduling refreshes
    ///
    /// Cancels the periodic trigger and the request debouncer. A cycle that
    /// is already in flight runs to completion or timeout and still
    /// publishes its result; later refresh requests resolve to
    /// [`RefreshError::Cancelled`].
    pub fn stop(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(coordinator = %self.inner.name, "Stopping coordinator");
        self.inner.debouncer.shutdown();
        if let Some(trigger) = self.inner.lock_trigger().take() {
            trigger.cancel();
        }
    }

    /// Stop the coordinator and drop every listener
    pub fn shutdown(&self) {
        self.stop();
        self.inner.listeners.clear();
    }

    /// Whether `stop()` has been called
    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Whether a fetch is currently in flight
    pub fn is_refreshing(&self) -> bool {
        self.inner.lock_in_flight().is_some()
    }

    /// Whether the periodic refresh is currently scheduled
    pub fn is_scheduled(&self) -> bool {
        self.inner.lock_trigger().is_some()
    }

    /// Last known good payload
    pub fn data(&self) -> Option<D> {
        self.inner.read_state().data.clone()
    }

    /// Whether the last completed cycle succeeded
    pub fn last_update_success(&self) -> bool {
        self.inner.read_state().last_update_success
    }

    /// Failure of the last completed cycle, if any
    pub fn last_exception(&self) -> Option<RefreshError> {
        self.inner.read_state().last_exception.clone()
    }

    /// When data was last replaced
    pub fn last_update_success_time(&self) -> Option<DateTime<Utc>> {
        self.inner.read_state().last_update_success_time
    }

    /// Current position in the refresh cycle
    pub fn phase(&self) -> CoordinatorPhase {
        self.inner.read_state().phase
    }

    /// Consistent copy of all published state
    pub fn state(&self) -> CoordinatorState<D> {
        self.inner.read_state().clone()
    }
}

impl<D> std::fmt::Debug for DataUpdateCoordinator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.read_state();
        f.debug_struct("DataUpdateCoordinator")
            .field("name", &self.inner.name)
            .field("update_interval", &self.inner.update_interval)
            .field("timeout", &self.inner.timeout)
            .field("last_update_success", &state.last_update_success)
            .field("phase", &state.phase)
            .finish()
    }
}

/// Clears the in-flight slot when a cycle ends, however it ends
struct InFlightGuard<'a, D> {
    slot: &'a Mutex<Option<SharedRefresh<D>>>,
}

impl<D> Drop for InFlightGuard<'_, D> {
    fn drop(&mut self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl<D> Inner<D> {
    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, CoordinatorState<D>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, CoordinatorState<D>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Option<SharedRefresh<D>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_trigger(&self) -> MutexGuard<'_, Option<PeriodicTrigger>> {
        self.trigger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D> Inner<D>
where
    D: Clone + Send + Sync + 'static,
{
    /// Join the in-flight cycle or start a new one
    async fn refresh(this: &Arc<Self>, kind: RefreshKind) -> Result<D, RefreshError> {
        let shared = {
            let mut slot = this.lock_in_flight();
            match slot.as_ref() {
                Some(existing) => {
                    trace!(coordinator = %this.name, ?kind, "Joining in-flight refresh");
                    existing.clone()
                }
                None => {
                    if this.shutdown.load(Ordering::SeqCst) {
                        debug!(coordinator = %this.name, ?kind, "Refresh requested after stop");
                        return Err(RefreshError::Cancelled);
                    }

                    // The cycle runs in its own task so it always publishes,
                    // even if every caller awaiting it goes away.
                    let handle = tokio::spawn(Self::run_cycle(this.clone(), kind));
                    let outcome: SharedRefresh<D> = async move {
                        match handle.await {
                            Ok(outcome) => outcome,
                            Err(err) if err.is_cancelled() => Err(RefreshError::Cancelled),
                            Err(err) => Err(RefreshError::UpdateFailed(format!(
                                "refresh task failed: {err}"
                            ))),
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(outcome.clone());
                    outcome
                }
            }
        };
        shared.await
    }

    /// One complete refresh cycle: fetch, publish, notify, release
    async fn run_cycle(this: Arc<Self>, kind: RefreshKind) -> Result<D, RefreshError> {
        let _in_flight = InFlightGuard {
            slot: &this.in_flight,
        };

        if kind == RefreshKind::Scheduled {
            let auth_failure = this
                .read_state()
                .last_exception
                .clone()
                .filter(RefreshError::is_auth_failed);
            if let Some(err) = auth_failure {
                debug!(
                    coordinator = %this.name,
                    "Skipping scheduled refresh until re-authenticated"
                );
                return Err(err);
            }
        }

        this.write_state().phase = CoordinatorPhase::Fetching;
        let started = Instant::now();
        let result = AssertUnwindSafe(fetch_with_timeout(this.update_method.as_ref(), this.timeout))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(RefreshError::UpdateFailed(format!(
                    "update method panicked: {}",
                    panic_message(&*payload)
                )))
            });
        this.publish(result, kind, started.elapsed())
    }

    /// Apply a fetch result to the state group, then notify listeners
    fn publish(
        &self,
        result: Result<D, RefreshError>,
        kind: RefreshKind,
        elapsed: Duration,
    ) -> Result<D, RefreshError> {
        let was_failing = {
            let mut state = self.write_state();
            let was_failing = state.last_exception.is_some();
            match &result {
                Ok(data) => {
                    state.data = Some(data.clone());
                    state.last_update_success = true;
                    state.last_exception = None;
                    state.last_update_success_time = Some(Utc::now());
                    state.phase = CoordinatorPhase::Idle;
                }
                Err(err) => {
                    state.last_update_success = false;
                    state.last_exception = Some(err.clone());
                    state.phase = if err.is_auth_failed() {
                        CoordinatorPhase::AuthFailed
                    } else {
                        CoordinatorPhase::Idle
                    };
                }
            }
            was_failing
        };

        match &result {
            Ok(_) => {
                if was_failing {
                    info!(coordinator = %self.name, "Fetching {} data recovered", self.name);
                }
                debug!(
                    coordinator = %self.name,
                    ?kind,
                    ?elapsed,
                    "Finished fetching {} data (success: true)",
                    self.name
                );
            }
            Err(RefreshError::AuthenticationFailed(reason)) => {
                error!(
                    coordinator = %self.name,
                    "Authentication failed while fetching {} data: {}",
                    self.name,
                    reason
                );
                if kind != RefreshKind::FirstRefresh {
                    match &self.reauth {
                        Some(handler) => handler.start_reauth(&self.name, reason),
                        None => warn!(
                            coordinator = %self.name,
                            "No re-authentication handler registered"
                        ),
                    }
                }
            }
            Err(err) => {
                if was_failing {
                    debug!(coordinator = %self.name, ?kind, "Error fetching {} data: {}", self.name, err);
                } else {
                    error!(coordinator = %self.name, "Error fetching {} data: {}", self.name, err);
                }
            }
        }

        let notified = self.listeners.notify_all();
        trace!(coordinator = %self.name, notified, "Listeners notified");
        result
    }

    /// Start the periodic trigger if it should be running and is not
    fn schedule_refresh(self: &Arc<Self>) {
        let Some(interval) = self.update_interval else {
            return;
        };
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            debug!(coordinator = %self.name, "No runtime available, refresh not scheduled");
            return;
        }

        let mut trigger = self.lock_trigger();
        if trigger.is_some() || self.listeners.is_empty() {
            return;
        }

        let owner = Arc::downgrade(self);
        *trigger = Some(PeriodicTrigger::spawn(self.name.clone(), interval, move || {
            let inner = owner.upgrade()?;
            Some(
                async move {
                    let _ = Inner::refresh(&inner, RefreshKind::Scheduled).await;
                }
                .boxed(),
            )
        }));
    }

    /// Stop the periodic trigger once nobody listens
    fn unschedule_refresh(&self) {
        let mut trigger = self.lock_trigger();
        if self.listeners.is_empty() {
            if let Some(trigger) = trigger.take() {
                debug!(coordinator = %self.name, "No listeners left, unscheduling refresh");
                trigger.cancel();
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

impl<D> RemoveListener for Inner<D>
where
    D: Clone + Send + Sync + 'static,
{
    fn remove_listener(&self, id: ListenerId) {
        if let Some(remaining) = self.listeners.remove(id) {
            trace!(coordinator = %self.name, ?id, remaining, "Listener removed");
            if remaining == 0 {
                self.unschedule_refresh();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpdateError;
    use std::sync::atomic::AtomicUsize;

    fn counting_coordinator(
        interval: Option<Duration>,
    ) -> (DataUpdateCoordinator<u32>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let coordinator = DataUpdateCoordinator::new(
            "counter",
            interval,
            Duration::from_secs(5),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) as u32 + 1;
                async move { Ok::<_, UpdateError>(n) }
            },
        );
        (coordinator, calls)
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (coordinator, _) = counting_coordinator(None);
        let state = coordinator.state();
        assert!(state.data.is_none());
        assert!(!state.last_update_success);
        assert!(state.last_exception.is_none());
        assert_eq!(state.phase, CoordinatorPhase::Idle);
        assert_eq!(coordinator.name(), "counter");
        assert_eq!(coordinator.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_refresh_publishes_data() {
        let (coordinator, calls) = counting_coordinator(None);

        assert_eq!(coordinator.async_refresh().await, Ok(1));
        assert_eq!(coordinator.data(), Some(1));
        assert!(coordinator.last_update_success());
        assert!(coordinator.last_update_success_time().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_zero_interval_means_on_demand() {
        let coordinator: DataUpdateCoordinator<u32> = DataUpdateCoordinator::builder("push")
            .with_update_interval(Duration::ZERO)
            .build(|| async { Ok::<_, UpdateError>(1) });
        assert_eq!(coordinator.update_interval(), None);

        let _handle = coordinator.add_listener(|| {});
        assert!(!coordinator.is_scheduled());
    }

    #[tokio::test]
    async fn test_builder_with_config() {
        let config = CoordinatorConfig::new("configured")
            .with_scan_interval(30.0)
            .with_timeout(3.0);
        let coordinator: DataUpdateCoordinator<u32> = DataUpdateCoordinator::builder("ignored")
            .with_config(&config)
            .build(|| async { Ok::<_, UpdateError>(1) });

        assert_eq!(coordinator.name(), "configured");
        assert_eq!(coordinator.update_interval(), Some(Duration::from_secs(30)));
        assert_eq!(coordinator.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_add_listener_outside_runtime_does_not_schedule() {
        let (coordinator, _) = counting_coordinator(Some(Duration::from_secs(60)));
        let handle = coordinator.add_listener(|| {});
        assert!(!coordinator.is_scheduled());
        assert_eq!(coordinator.listener_count(), 1);
        handle.remove();
        assert_eq!(coordinator.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_listener_handle_outlives_coordinator() {
        let (coordinator, _) = counting_coordinator(None);
        let handle = coordinator.add_listener(|| {});
        drop(coordinator);
        // Owner is gone; removal is a no-op
        handle.remove();
    }

    #[tokio::test]
    async fn test_listener_contexts() {
        let (coordinator, _) = counting_coordinator(None);
        let _a = coordinator.add_listener_with_context(|| {}, serde_json::json!("sensor.power"));
        let _b = coordinator.add_listener(|| {});
        assert_eq!(
            coordinator.listener_contexts(),
            vec![serde_json::json!("sensor.power")]
        );
    }

    #[tokio::test]
    async fn test_shutdown_clears_listeners() {
        let (coordinator, _) = counting_coordinator(None);
        let _handle = coordinator.add_listener(|| {});
        coordinator.shutdown();
        assert!(coordinator.is_stopped());
        assert_eq!(coordinator.listener_count(), 0);
        assert_eq!(coordinator.async_refresh().await, Err(RefreshError::Cancelled));
    }
}
