//! Home Assistant coordinator poller
//!
//! Loads a YAML file listing JSON data sources, runs one coordinator per
//! source and logs every update until Ctrl-C.
//!
//! ```yaml
//! coordinators:
//!   - name: living_room
//!     path: /var/lib/sensors/living_room.json
//!     scan_interval: 30
//!   - name: garage
//!     path: /var/lib/sensors/garage.json
//!     scan_interval: 120
//!     timeout: 5
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use ha_coordinator::{
    load_yaml_file, CoordinatorConfig, DataUpdateCoordinator, EntryScope, SetupError,
    UpdateError, UpdateMethod,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_CONFIG_PATH: &str = "poller.yaml";

/// Top-level poller configuration
#[derive(Debug, Deserialize)]
struct PollerConfig {
    coordinators: Vec<SourceConfig>,
}

/// One polled JSON file
#[derive(Debug, Deserialize)]
struct SourceConfig {
    #[serde(flatten)]
    coordinator: CoordinatorConfig,
    path: PathBuf,
}

impl PollerConfig {
    fn load(path: &Path) -> Result<Self> {
        let config: Self = load_yaml_file(path)?;
        if config.coordinators.is_empty() {
            bail!("no coordinators configured in {}", path.display());
        }
        for source in &config.coordinators {
            source
                .coordinator
                .validate()
                .with_context(|| format!("invalid coordinator {}", source.coordinator.name))?;
        }
        Ok(config)
    }
}

/// Reads a JSON document from disk on every refresh
struct JsonFileSource {
    path: PathBuf,
}

#[async_trait]
impl UpdateMethod<Value> for JsonFileSource {
    async fn fetch(&self) -> Result<Value, UpdateError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| {
                let reason = format!("{}: {}", self.path.display(), err);
                match err.kind() {
                    ErrorKind::PermissionDenied => UpdateError::AuthFailed(reason),
                    _ => UpdateError::Failed(reason),
                }
            })?;
        serde_json::from_str(&content).map_err(UpdateError::other)
    }
}

/// A running coordinator and the entry that owns it
struct LoadedSource {
    entry: Arc<EntryScope>,
    coordinator: DataUpdateCoordinator<Value>,
}

async fn setup_source(source: SourceConfig) -> Option<LoadedSource> {
    let entry = Arc::new(EntryScope::new("json_file", source.coordinator.name.clone()));
    let coordinator: DataUpdateCoordinator<Value> =
        DataUpdateCoordinator::builder(source.coordinator.name.clone())
            .with_config(&source.coordinator)
            .with_reauth_handler(entry.clone())
            .build(JsonFileSource { path: source.path });

    let watched = coordinator.clone();
    let handle = coordinator.add_listener(move || match watched.data() {
        Some(data) if watched.last_update_success() => {
            info!(coordinator = %watched.name(), "Updated: {}", data);
        }
        Some(_) => {
            warn!(coordinator = %watched.name(), "Serving stale data");
        }
        None => {}
    });
    entry.on_unload(handle.into_callback());
    let stopper = coordinator.clone();
    entry.on_unload(move || stopper.stop());

    match coordinator.first_refresh().await {
        Ok(()) => {
            info!(entry_id = %entry.entry_id(), "Set up {}", entry.title());
        }
        Err(SetupError::NotReady(err)) => {
            warn!(
                entry_id = %entry.entry_id(),
                "{} not ready yet, polling continues: {}",
                entry.title(),
                err
            );
        }
        Err(SetupError::AuthFailed(reason)) => {
            error!(
                entry_id = %entry.entry_id(),
                "Setup of {} failed, access denied: {}",
                entry.title(),
                reason
            );
            entry.unload();
            return None;
        }
    }

    Some(LoadedSource { entry, coordinator })
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = PollerConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    info!(
        "Starting poller with {} coordinators",
        config.coordinators.len()
    );

    let mut loaded = Vec::new();
    for source in config.coordinators {
        if let Some(source) = setup_source(source).await {
            loaded.push(source);
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    for source in loaded.iter().rev() {
        source.entry.unload();
        info!(
            coordinator = %source.coordinator.name(),
            last_update_success = source.coordinator.last_update_success(),
            "Coordinator stopped"
        );
    }

    Ok(())
}
