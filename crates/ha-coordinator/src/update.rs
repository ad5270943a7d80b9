//! Update methods and the timeout wrapper around them
//!
//! An update method is the single unit of work a coordinator is built
//! around: it talks to the vendor SDK and returns the fresh payload. Any
//! `Fn() -> impl Future<Output = Result<D, UpdateError>>` closure is an
//! update method; integrations holding a client can implement
//! [`UpdateMethod`] on it directly.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::error::{RefreshError, UpdateError};

/// The fetch function bound to a coordinator
#[async_trait]
pub trait UpdateMethod<D>: Send + Sync {
    /// Fetch the latest payload from the data source
    async fn fetch(&self) -> Result<D, UpdateError>;
}

#[async_trait]
impl<D, F, Fut> UpdateMethod<D> for F
where
    D: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<D, UpdateError>> + Send + 'static,
{
    async fn fetch(&self) -> Result<D, UpdateError> {
        (self)().await
    }
}

/// Run one fetch bounded by `timeout`
///
/// On expiry the fetch future is dropped, which cancels whatever the vendor
/// call was awaiting. The same happens when the task driving this future is
/// aborted, so no fetch outlives its refresh cycle.
pub async fn fetch_with_timeout<D, M>(method: &M, timeout: Duration) -> Result<D, RefreshError>
where
    M: UpdateMethod<D> + ?Sized,
{
    match tokio::time::timeout(timeout, method.fetch()).await {
        Ok(result) => result.map_err(RefreshError::from),
        Err(_elapsed) => {
            trace!(?timeout, "Update method timed out, fetch dropped");
            Err(RefreshError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct Client {
        online: bool,
    }

    #[async_trait]
    impl UpdateMethod<u32> for Client {
        async fn fetch(&self) -> Result<u32, UpdateError> {
            if self.online {
                Ok(42)
            } else {
                Err(UpdateError::Failed("device offline".into()))
            }
        }
    }

    #[tokio::test]
    async fn test_closure_is_update_method() {
        let method = || async { Ok::<_, UpdateError>(7_u32) };
        let result = fetch_with_timeout::<u32, _>(&method, Duration::from_secs(1)).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_struct_update_method() {
        let online = Client { online: true };
        let offline = Client { online: false };
        assert_eq!(fetch_with_timeout::<u32, _>(&online, Duration::from_secs(1)).await, Ok(42));
        assert_eq!(
            fetch_with_timeout::<u32, _>(&offline, Duration::from_secs(1)).await,
            Err(RefreshError::UpdateFailed("device offline".into()))
        );
    }

    #[tokio::test]
    async fn test_auth_failure_is_classified() {
        let method = || async { Err::<u32, _>(UpdateError::AuthFailed("token revoked".into())) };
        let result = fetch_with_timeout::<u32, _>(&method, Duration::from_secs(1)).await;
        assert_eq!(
            result,
            Err(RefreshError::AuthenticationFailed("token revoked".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_drops_fetch() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let method = move || {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                flag.store(true, Ordering::SeqCst);
                Ok::<_, UpdateError>(1_u32)
            }
        };

        let result = fetch_with_timeout::<u32, _>(&method, Duration::from_secs(10)).await;
        assert_eq!(result, Err(RefreshError::Timeout(Duration::from_secs(10))));

        // The abandoned fetch never resumes
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
