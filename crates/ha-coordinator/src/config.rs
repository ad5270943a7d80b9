//! YAML configuration for coordinators
//!
//! ```yaml
//! name: living_room
//! scan_interval: 30        # seconds, omit for push/on-demand sources
//! timeout: 10              # seconds
//! request_refresh_cooldown: 10
//! request_refresh_immediate: true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default bound on a single fetch, in seconds
pub const DEFAULT_TIMEOUT_SECS: f64 = 10.0;

/// Default cooldown between debounced refresh requests, in seconds
pub const DEFAULT_REQUEST_REFRESH_COOLDOWN_SECS: f64 = 10.0;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading coordinator configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML
    #[error("failed to parse YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Settings for one coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Name used in logs and diagnostics
    pub name: String,

    /// Seconds between scheduled refreshes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_interval: Option<f64>,

    /// Seconds a single fetch may run before it counts as failed
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    /// Cooldown for debounced refresh requests, in seconds
    #[serde(default = "default_request_refresh_cooldown")]
    pub request_refresh_cooldown: f64,

    /// Whether a debounced request outside the cooldown runs right away
    #[serde(default = "default_true")]
    pub request_refresh_immediate: bool,
}

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_request_refresh_cooldown() -> f64 {
    DEFAULT_REQUEST_REFRESH_COOLDOWN_SECS
}

fn default_true() -> bool {
    true
}

impl CoordinatorConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scan_interval: None,
            timeout: DEFAULT_TIMEOUT_SECS,
            request_refresh_cooldown: DEFAULT_REQUEST_REFRESH_COOLDOWN_SECS,
            request_refresh_immediate: true,
        }
    }

    pub fn with_scan_interval(mut self, seconds: f64) -> Self {
        self.scan_interval = Some(seconds);
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = seconds;
        self
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
                path: PathBuf::from("<string>"),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that all durations are usable
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(interval) = self.scan_interval {
            positive_seconds("scan_interval", interval)?;
        }
        positive_seconds("timeout", self.timeout)?;
        if !self.request_refresh_cooldown.is_finite() || self.request_refresh_cooldown < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "request_refresh_cooldown".to_string(),
                reason: format!(
                    "expected a non-negative number of seconds, got {}",
                    self.request_refresh_cooldown
                ),
            });
        }
        Ok(())
    }

    /// Interval between scheduled refreshes, `None` for on-demand sources
    pub fn update_interval(&self) -> Option<Duration> {
        self.scan_interval
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .filter(|interval| !interval.is_zero())
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout)
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS))
    }

    pub fn request_refresh_cooldown_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_refresh_cooldown).unwrap_or(Duration::ZERO)
    }
}

fn positive_seconds(key: &str, value: f64) -> ConfigResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("expected a positive number of seconds, got {value}"),
        })
    }
}

/// Load any YAML document from disk
pub fn load_yaml_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> ConfigResult<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::ParseYaml {
        path: path.to_path_buf(),
        source,
    })
}
