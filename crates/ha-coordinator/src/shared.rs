//! Host-owned shared resources
//!
//! Several coordinators often share one expensive resource, such as a
//! vendor cloud session or a database engine. Instead of a lazily created
//! global, the host owns a [`SharedResource`] with explicit init and
//! teardown hooks and hands it to the coordinators that need it.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::debug;

type InitHook<T, E> = Box<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;
type TeardownHook<T> = Box<dyn Fn(Arc<T>) -> BoxFuture<'static, ()> + Send + Sync>;

/// A lazily initialised, explicitly torn down resource
pub struct SharedResource<T, E> {
    name: String,
    init: InitHook<T, E>,
    teardown: Option<TeardownHook<T>>,
    value: Mutex<Option<Arc<T>>>,
}

impl<T, E> SharedResource<T, E>
where
    T: Send + Sync + 'static,
    E: Send + 'static,
{
    pub fn new<F, Fut>(name: impl Into<String>, init: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            name: name.into(),
            init: Box::new(move || init().boxed()),
            teardown: None,
            value: Mutex::new(None),
        }
    }

    /// Hook run with the live value on `teardown()`
    pub fn with_teardown<F, Fut>(mut self, teardown: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.teardown = Some(Box::new(move |value| teardown(value).boxed()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the resource, running the init hook if it is not live
    ///
    /// Concurrent first callers wait for a single initialisation. A failed
    /// init leaves the resource uninitialised so the next call retries.
    pub async fn get(&self) -> Result<Arc<T>, E> {
        let mut value = self.value.lock().await;
        if let Some(existing) = value.as_ref() {
            return Ok(existing.clone());
        }

        debug!(resource = %self.name, "Initializing shared resource");
        let created = Arc::new((self.init)().await?);
        *value = Some(created.clone());
        Ok(created)
    }

    /// Release the resource, returning whether it was live
    pub async fn teardown(&self) -> bool {
        let taken = self.value.lock().await.take();
        let Some(value) = taken else {
            return false;
        };

        debug!(resource = %self.name, "Tearing down shared resource");
        if let Some(teardown) = &self.teardown {
            teardown(value).await;
        }
        true
    }

    pub async fn is_initialized(&self) -> bool {
        self.value.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_resource() -> (SharedResource<String, String>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let inits = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        let init_count = inits.clone();
        let teardown_count = teardowns.clone();

        let resource = SharedResource::new("session", move || {
            let n = init_count.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(format!("session-{n}")) }
        })
        .with_teardown(move |_session| {
            teardown_count.fetch_add(1, Ordering::SeqCst);
            async {}
        });
        (resource, inits, teardowns)
    }

    #[tokio::test]
    async fn test_initializes_once() {
        let (resource, inits, _) = counted_resource();

        let a = resource.get().await.unwrap();
        let b = resource.get().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a, "session-1");
        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_teardown_and_reinit() {
        let (resource, inits, teardowns) = counted_resource();

        assert!(!resource.teardown().await);
        resource.get().await.unwrap();
        assert!(resource.teardown().await);
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
        assert!(!resource.is_initialized().await);

        let again = resource.get().await.unwrap();
        assert_eq!(*again, "session-2");
        assert_eq!(inits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_init_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let resource: SharedResource<u32, String> = SharedResource::new("flaky", move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err("cloud unreachable".to_string())
                } else {
                    Ok(7)
                }
            }
        });

        assert_eq!(resource.get().await.unwrap_err(), "cloud unreachable");
        assert!(!resource.is_initialized().await);
        assert_eq!(*resource.get().await.unwrap(), 7);
    }
}
