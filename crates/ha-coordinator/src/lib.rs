//! Polling data coordinator for Home Assistant integrations
//!
//! A [`DataUpdateCoordinator`] sits between one remote data source and the
//! entities that display it. It fetches on a fixed interval or on demand,
//! never runs two fetches at once, keeps the last good payload through
//! failures and notifies listeners once per completed refresh cycle.
//!
//! - [`UpdateMethod`] - the fetch function bound to a coordinator
//! - [`Debouncer`] - collapses bursts of refresh requests
//! - [`EntryScope`] - unload callbacks and re-auth for the owning entry
//! - [`SharedResource`] - host-owned resources shared by coordinators
//!
//! # Example
//!
//! ```ignore
//! use ha_coordinator::{DataUpdateCoordinator, UpdateError};
//! use std::time::Duration;
//!
//! let coordinator = DataUpdateCoordinator::builder("thermostat")
//!     .with_update_interval(Duration::from_secs(30))
//!     .build(|| async { client.read_temperature().await.map_err(UpdateError::other) });
//!
//! coordinator.first_refresh().await?;
//! let handle = coordinator.add_listener(move || {
//!     println!("temperature: {:?}", coordinator_clone.data());
//! });
//! ```

mod config;
mod coordinator;
mod debounce;
mod entry;
mod error;
mod listeners;
mod schedule;
mod shared;
mod update;

pub use config::{
    load_yaml_file, ConfigError, ConfigResult, CoordinatorConfig,
    DEFAULT_REQUEST_REFRESH_COOLDOWN_SECS, DEFAULT_TIMEOUT_SECS,
};
pub use coordinator::{
    CoordinatorBuilder, CoordinatorPhase, CoordinatorState, DataUpdateCoordinator,
    DEFAULT_TIMEOUT, REQUEST_REFRESH_DEFAULT_COOLDOWN,
};
pub use debounce::Debouncer;
pub use entry::{EntryScope, ReauthHandler};
pub use error::{RefreshError, SetupError, UpdateError};
pub use listeners::{ListenerHandle, ListenerId};
pub use shared::SharedResource;
pub use update::{fetch_with_timeout, UpdateMethod};
