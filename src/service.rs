//! Cache facade: pick an engine from configuration and expose it as one type.
//!
//! [`new_cache`] is the single entry point. It returns a [`CacheService`] that
//! dispatches every [`Cache`] operation to the selected engine, plus a [`Release`]
//! handle for tearing the engine down.

use crate::backend::{Cache, Capabilities, FieldTtl};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::lock::LockGuard;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "inmemory")]
use crate::backend::LocalCache;
#[cfg(feature = "redis")]
use crate::backend::RemoteCache;

/// A cache bound to the engine chosen by its [`CacheMode`](crate::CacheMode).
///
/// Cheap to clone: clones share the same store (local) or pool (remote).
///
/// # Example
///
/// ```no_run
/// use svc_cache::{new_cache, Cache, CacheConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> svc_cache::Result<()> {
///     let config = CacheConfig::<String>::new("sessions").with_default_ttl(Duration::from_secs(60));
///     let (cache, release) = new_cache(config).await?;
///
///     cache.set("user:1", "token".to_string()).await?;
///     assert_eq!(cache.get("user:1").await?.as_deref(), Some("token"));
///
///     release.release();
///     Ok(())
/// }
/// ```
pub enum CacheService<T> {
    #[cfg(feature = "inmemory")]
    Local(LocalCache<T>),
    #[cfg(feature = "redis")]
    Remote(RemoteCache<T>),
}

macro_rules! dispatch {
    ($service:expr, $engine:ident => $call:expr) => {
        match $service {
            #[cfg(feature = "inmemory")]
            CacheService::Local($engine) => $call,
            #[cfg(feature = "redis")]
            CacheService::Remote($engine) => $call,
        }
    };
}

impl<T> CacheService<T> {
    pub fn is_local(&self) -> bool {
        match self {
            #[cfg(feature = "inmemory")]
            CacheService::Local(_) => true,
            #[cfg(feature = "redis")]
            CacheService::Remote(_) => false,
        }
    }
}

impl<T> Clone for CacheService<T> {
    fn clone(&self) -> Self {
        match self {
            #[cfg(feature = "inmemory")]
            CacheService::Local(engine) => CacheService::Local(engine.clone()),
            #[cfg(feature = "redis")]
            CacheService::Remote(engine) => CacheService::Remote(engine.clone()),
        }
    }
}

impl<T> fmt::Debug for CacheService<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engine = if self.is_local() { "local" } else { "remote" };
        f.debug_struct("CacheService").field("engine", &engine).finish()
    }
}

impl<T> Cache<T> for CacheService<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<T>> {
        dispatch!(self, engine => engine.get(key).await)
    }

    async fn set(&self, key: &str, value: T) -> Result<()> {
        dispatch!(self, engine => engine.set(key, value).await)
    }

    async fn set_with_ttl(&self, key: &str, value: T, ttl: Duration) -> Result<()> {
        dispatch!(self, engine => engine.set_with_ttl(key, value, ttl).await)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        dispatch!(self, engine => engine.delete(key).await)
    }

    async fn delete_multi(&self, keys: &[&str]) -> Result<u64> {
        dispatch!(self, engine => engine.delete_multi(keys).await)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        dispatch!(self, engine => engine.expire(key, ttl).await)
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        dispatch!(self, engine => engine.increment(key, delta).await)
    }

    async fn decrement(&self, key: &str, delta: i64) -> Result<i64> {
        dispatch!(self, engine => engine.decrement(key, delta).await)
    }

    async fn hset(&self, key: &str, field: &str, value: T) -> Result<()> {
        dispatch!(self, engine => engine.hset(key, field, value).await)
    }

    async fn hset_with_ttl(&self, key: &str, field: &str, value: T, ttl: Duration) -> Result<()> {
        dispatch!(self, engine => engine.hset_with_ttl(key, field, value, ttl).await)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<T>> {
        dispatch!(self, engine => engine.hget(key, field).await)
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, T>> {
        dispatch!(self, engine => engine.hget_all(key).await)
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<()> {
        dispatch!(self, engine => engine.hdel(key, fields).await)
    }

    async fn hexpire(&self, key: &str, field: &str, ttl: Duration) -> Result<bool> {
        dispatch!(self, engine => engine.hexpire(key, field, ttl).await)
    }

    async fn httl(&self, key: &str, field: &str) -> Result<FieldTtl> {
        dispatch!(self, engine => engine.httl(key, field).await)
    }

    async fn lock(&self, key: &str) -> Result<LockGuard> {
        dispatch!(self, engine => engine.lock(key).await)
    }

    async fn try_lock(&self, key: &str) -> Result<LockGuard> {
        dispatch!(self, engine => engine.try_lock(key).await)
    }

    fn capabilities(&self) -> Capabilities {
        dispatch!(self, engine => engine.capabilities())
    }
}

type ReleaseFn = Box<dyn Fn() + Send + Sync>;

struct ReleaseState {
    released: AtomicBool,
    on_release: Option<ReleaseFn>,
}

/// Teardown handle returned by [`new_cache`].
///
/// Idempotent and safe to call from any thread any number of times. Releasing a
/// local cache clears its store; releasing a remote cache leaves the shared pool
/// open (see [`shutdown_shared_connection`](crate::backend::shutdown_shared_connection)).
#[derive(Clone)]
pub struct Release {
    state: Arc<ReleaseState>,
}

impl Release {
    fn new(on_release: Option<ReleaseFn>) -> Self {
        Release {
            state: Arc::new(ReleaseState {
                released: AtomicBool::new(false),
                on_release,
            }),
        }
    }

    pub fn release(&self) {
        if self.state.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(on_release) = &self.state.on_release {
            on_release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.state.released.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Release")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Build a cache from its configuration.
///
/// `CacheMode::Local` builds a local engine; every other mode builds a remote
/// engine on the shared pool and checks connectivity with a `PING`.
///
/// # Errors
/// - `Error::ConfigError` for an invalid configuration or malformed address
/// - `Error::BackendError` if the remote server does not answer
/// - `Error::NotImplemented` if the mode's engine feature is not compiled in
pub async fn new_cache<T>(config: CacheConfig<T>) -> Result<(CacheService<T>, Release)>
where
    T: Clone + Send + Sync + 'static,
{
    config.validate()?;

    let built = if config.mode.is_local() {
        build_local(&config)?
    } else {
        build_remote(&config).await?
    };

    info!(
        "✓ Cache {} ready ({} mode, serializer: {})",
        config.name,
        config.mode,
        config.serializer.name()
    );
    Ok(built)
}

#[cfg(feature = "inmemory")]
fn build_local<T>(config: &CacheConfig<T>) -> Result<(CacheService<T>, Release)>
where
    T: Clone + Send + Sync + 'static,
{
    let engine = LocalCache::new(config);
    let owned = engine.clone();
    let release = Release::new(Some(Box::new(move || owned.close())));
    Ok((CacheService::Local(engine), release))
}

#[cfg(not(feature = "inmemory"))]
fn build_local<T>(_config: &CacheConfig<T>) -> Result<(CacheService<T>, Release)> {
    Err(Error::NotImplemented(
        "local mode requires the `inmemory` feature".to_string(),
    ))
}

#[cfg(feature = "redis")]
async fn build_remote<T>(config: &CacheConfig<T>) -> Result<(CacheService<T>, Release)>
where
    T: Clone + Send + Sync + 'static,
{
    let engine = RemoteCache::new(config).await?;
    if !engine.health_check().await? {
        return Err(Error::BackendError(format!(
            "unexpected PING reply from {}",
            config.remote_address
        )));
    }
    Ok((CacheService::Remote(engine), Release::new(None)))
}

#[cfg(not(feature = "redis"))]
async fn build_remote<T>(config: &CacheConfig<T>) -> Result<(CacheService<T>, Release)> {
    Err(Error::NotImplemented(format!(
        "{} mode requires the `redis` feature",
        config.mode
    )))
}

#[cfg(all(test, feature = "inmemory"))]
mod tests {
    use super::*;
    use crate::config::CacheMode;

    #[tokio::test]
    async fn test_new_cache_local() {
        let (cache, release) = new_cache(CacheConfig::<String>::new("svc"))
            .await
            .expect("Failed to build cache");

        assert!(cache.is_local());
        assert_eq!(cache.capabilities(), Capabilities::LOCAL);

        cache.set("k", "v".to_string()).await.expect("Failed to set");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.get("k").await.expect("Failed to get").as_deref(), Some("v"));

        release.release();
        assert!(release.is_released());
        assert_eq!(cache.get("k").await.expect("Failed to get"), None);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (cache, release) = new_cache(CacheConfig::<String>::new("svc"))
            .await
            .expect("Failed to build cache");
        let other = release.clone();

        release.release();
        other.release();
        release.release();
        assert!(other.is_released());

        // A released local cache is empty but still usable.
        cache.set("k", "v".to_string()).await.expect("Failed to set");
    }

    #[tokio::test]
    async fn test_release_from_many_threads() {
        let (_cache, release) = new_cache(CacheConfig::<u64>::new("svc"))
            .await
            .expect("Failed to build cache");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let release = release.clone();
                std::thread::spawn(move || release.release())
            })
            .collect();
        for handle in handles {
            handle.join().expect("Thread panicked");
        }
        assert!(release.is_released());
    }

    #[tokio::test]
    async fn test_remote_without_address_is_config_error() {
        let config = CacheConfig::<String>::new("svc").with_mode(CacheMode::Cluster);
        let result = new_cache(config).await;
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_remote_without_feature_is_not_implemented() {
        let config = CacheConfig::<String>::new("svc")
            .with_mode(CacheMode::Remote)
            .with_remote_address("localhost:6379");
        let result = new_cache(config).await;
        assert!(matches!(result, Err(Error::NotImplemented(_))));
    }

    #[tokio::test]
    async fn test_clone_shares_engine() {
        let (cache, _release) = new_cache(CacheConfig::<String>::new("svc"))
            .await
            .expect("Failed to build cache");
        let clone = cache.clone();

        cache.set("shared", "yes".to_string()).await.expect("Failed to set");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            clone.get("shared").await.expect("Failed to get").as_deref(),
            Some("yes")
        );
    }
}
