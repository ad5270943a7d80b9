//! Error types for the update coordinator

use std::time::Duration;
use thiserror::Error;

/// Error returned by an update method
///
/// Integrations convert their vendor errors into one of these variants so
/// the coordinator can tell credential problems apart from everything else.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Credentials were rejected by the device or cloud service
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Transient failure (connection error, malformed response, ...)
    #[error("{0}")]
    Failed(String),

    /// Any other vendor error
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl UpdateError {
    /// Wrap an arbitrary vendor error as a transient failure
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Box::new(err))
    }

    pub fn is_auth_failed(&self) -> bool {
        matches!(self, UpdateError::AuthFailed(_))
    }
}

/// Outcome of a failed refresh cycle, as seen by callers and listeners
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    /// Credentials rejected; not retried on the normal schedule
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Transient failure; previous data is kept and the next tick retries
    #[error("update failed: {0}")]
    UpdateFailed(String),

    /// The update method did not finish within the coordinator timeout
    #[error("timeout fetching data after {0:?}")]
    Timeout(Duration),

    /// Refresh cancelled by `stop()` or shutdown before it completed
    #[error("refresh cancelled")]
    Cancelled,
}

impl RefreshError {
    /// Whether the failure should be retried on the next scheduled tick
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RefreshError::UpdateFailed(_) | RefreshError::Timeout(_)
        )
    }

    pub fn is_auth_failed(&self) -> bool {
        matches!(self, RefreshError::AuthenticationFailed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RefreshError::Cancelled)
    }
}

impl From<UpdateError> for RefreshError {
    fn from(err: UpdateError) -> Self {
        match err {
            UpdateError::AuthFailed(reason) => RefreshError::AuthenticationFailed(reason),
            UpdateError::Failed(reason) => RefreshError::UpdateFailed(reason),
            UpdateError::Other(source) => RefreshError::UpdateFailed(source.to_string()),
        }
    }
}

/// Error raised while setting up an entry from its first refresh
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SetupError {
    /// The first refresh failed; the entry should retry setup later
    #[error("entry not ready: {0}")]
    NotReady(RefreshError),

    /// The first refresh was rejected by the service
    #[error("entry authentication failed: {0}")]
    AuthFailed(String),
}

impl From<RefreshError> for SetupError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::AuthenticationFailed(reason) => SetupError::AuthFailed(reason),
            other => SetupError::NotReady(other),
        }
    }
}
