//! Redis/Valkey cache engine.
//!
//! All instances share one process-wide connection pool (see [`connection`]).
//! Values are encoded with the cache's [`SerDe`] strategy; counters use the
//! server's native integer commands, and hash fields carry their own TTLs through
//! the `HSETEX`/`HGETEX`/`HPEXPIRE`/`HTTL` family (Valkey 9 / Redis 8 or newer).

mod connection;
mod lock;

pub use connection::{shutdown_shared_connection, PoolStats};
pub use lock::LOCK_RETRY_INTERVAL;

use super::{Cache, Capabilities, FieldTtl};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::key::KeySpace;
use crate::lock::LockGuard;
use crate::serialization::SerDe;
use connection::{ConnectionSpec, SharedConnection};
use deadpool_redis::redis::cmd;
use lock::Locker;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by the server.
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Remote cache engine over a shared Redis/Valkey pool.
///
/// # Example
///
/// ```no_run
/// # use svc_cache::backend::{Cache, RemoteCache};
/// # use svc_cache::{CacheConfig, CacheMode};
/// # use svc_cache::error::Result;
/// # use std::time::Duration;
/// # async fn example() -> Result<()> {
/// let config = CacheConfig::<String>::new("sessions")
///     .with_mode(CacheMode::Remote)
///     .with_remote_address("localhost:6379")
///     .with_default_ttl(Duration::from_secs(1800));
/// let cache = RemoteCache::new(&config).await?;
///
/// cache.set("user:123", "token".to_string()).await?;
/// let value = cache.get("user:123").await?;
/// # Ok(())
/// # }
/// ```
pub struct RemoteCache<T> {
    keys: KeySpace,
    conn: &'static SharedConnection,
    default_ttl: Option<Duration>,
    apply_touch: bool,
    serializer: Arc<dyn SerDe<T>>,
    locker: Locker,
}

impl<T> RemoteCache<T>
where
    T: Send + Sync + 'static,
{
    /// Create an engine on the shared pool, creating the pool on first use.
    ///
    /// # Errors
    /// Returns `Err` if the address is malformed or the pool cannot be built.
    /// Connectivity is not checked here; see [`health_check`](Self::health_check).
    pub async fn new(config: &CacheConfig<T>) -> Result<Self> {
        config.validate()?;
        let spec = ConnectionSpec::parse(config.mode, &config.remote_address)?;
        let conn = SharedConnection::get_or_init(&spec, config.pool_size).await?;
        let keys = KeySpace::new(config.name.clone());

        let locker = Locker::new(
            conn,
            keys.clone(),
            config.mode.key_majority(),
            config.effective_lock_validity(),
        );

        info!(
            "✓ Redis cache {} initialized ({} mode, serializer: {})",
            config.name,
            config.mode,
            config.serializer.name()
        );

        Ok(RemoteCache {
            keys,
            conn,
            default_ttl: config.ttl(),
            apply_touch: config.apply_touch,
            serializer: Arc::clone(&config.serializer),
            locker,
        })
    }

    /// Round trip a `PING` to the server.
    ///
    /// # Errors
    /// Returns `Err` if no connection can be obtained or the server does not answer.
    pub async fn health_check(&self) -> Result<bool> {
        let pong: String = self.conn.query(&cmd("PING")).await?;
        Ok(pong == "PONG" || pong.contains("PONG"))
    }

    /// Get current pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        self.conn.pool_stats()
    }

    /// TTL to refresh on reads, if touch is enabled and a default TTL exists.
    fn touch_ttl(&self) -> Option<Duration> {
        if self.apply_touch {
            self.default_ttl
        } else {
            None
        }
    }

    fn decode(&self, composite: &str, bytes: &[u8]) -> Result<T> {
        self.serializer.deserialize(bytes).map_err(|e| {
            error!(
                "✗ Redis value at {} does not decode with {}: {}",
                composite,
                self.serializer.name(),
                e
            );
            e
        })
    }
}

impl<T> Clone for RemoteCache<T> {
    fn clone(&self) -> Self {
        RemoteCache {
            keys: self.keys.clone(),
            conn: self.conn,
            default_ttl: self.default_ttl,
            apply_touch: self.apply_touch,
            serializer: Arc::clone(&self.serializer),
            locker: self.locker.clone(),
        }
    }
}

impl<T> Cache<T> for RemoteCache<T>
where
    T: Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<T>> {
        let composite = self.keys.compose(key);
        let bytes: Option<Vec<u8>> = match self.touch_ttl() {
            Some(ttl) => {
                self.conn
                    .query(cmd("GETEX").arg(&composite).arg("PX").arg(millis(ttl)))
                    .await?
            }
            None => self.conn.query(cmd("GET").arg(&composite)).await?,
        };

        if bytes.is_some() {
            debug!("✓ Redis GET {} -> HIT", composite);
        } else {
            debug!("✓ Redis GET {} -> MISS", composite);
        }
        bytes.map(|bytes| self.decode(&composite, &bytes)).transpose()
    }

    async fn set(&self, key: &str, value: T) -> Result<()> {
        match self.default_ttl {
            Some(ttl) => self.set_with_ttl(key, value, ttl).await,
            None => {
                let composite = self.keys.compose(key);
                let bytes = self.serializer.serialize(&value)?;
                self.conn
                    .query::<()>(cmd("SET").arg(&composite).arg(bytes))
                    .await?;
                debug!("✓ Redis SET {}", composite);
                Ok(())
            }
        }
    }

    async fn set_with_ttl(&self, key: &str, value: T, ttl: Duration) -> Result<()> {
        let composite = self.keys.compose(key);
        let bytes = self.serializer.serialize(&value)?;

        if ttl.is_zero() {
            self.conn
                .query::<()>(cmd("SET").arg(&composite).arg(bytes))
                .await?;
            debug!("✓ Redis SET {}", composite);
        } else {
            self.conn
                .query::<()>(cmd("SET").arg(&composite).arg(bytes).arg("PX").arg(millis(ttl)))
                .await?;
            debug!("✓ Redis SET {} (TTL: {:?})", composite, ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let composite = self.keys.compose(key);
        self.conn.query::<u64>(cmd("DEL").arg(&composite)).await?;
        debug!("✓ Redis DELETE {}", composite);
        Ok(())
    }

    async fn delete_multi(&self, keys: &[&str]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let composites = self.keys.compose_all(keys);
        let removed: u64 = self.conn.query(cmd("DEL").arg(&composites)).await?;
        debug!("✓ Redis MDELETE {} keys ({} removed)", keys.len(), removed);
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let composite = self.keys.compose(key);
        let applied: i64 = self
            .conn
            .query(cmd("PEXPIRE").arg(&composite).arg(millis(ttl)))
            .await?;
        debug!("✓ Redis EXPIRE {} ({:?}) -> {}", composite, ttl, applied == 1);
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        let composite = self.keys.compose(key);
        let value: i64 = self
            .conn
            .query(cmd("INCRBY").arg(&composite).arg(delta))
            .await?;
        debug!("✓ Redis INCRBY {} {} -> {}", composite, delta, value);
        Ok(value)
    }

    async fn decrement(&self, key: &str, delta: i64) -> Result<i64> {
        let composite = self.keys.compose(key);
        let value: i64 = self
            .conn
            .query(cmd("DECRBY").arg(&composite).arg(delta))
            .await?;
        debug!("✓ Redis DECRBY {} {} -> {}", composite, delta, value);
        Ok(value)
    }

    async fn hset(&self, key: &str, field: &str, value: T) -> Result<()> {
        match self.default_ttl {
            Some(ttl) => self.hset_with_ttl(key, field, value, ttl).await,
            None => {
                let composite = self.keys.compose(key);
                let bytes = self.serializer.serialize(&value)?;
                self.conn
                    .query::<i64>(cmd("HSET").arg(&composite).arg(field).arg(bytes))
                    .await?;
                debug!("✓ Redis HSET {} {}", composite, field);
                Ok(())
            }
        }
    }

    async fn hset_with_ttl(&self, key: &str, field: &str, value: T, ttl: Duration) -> Result<()> {
        let composite = self.keys.compose(key);
        let bytes = self.serializer.serialize(&value)?;

        if ttl.is_zero() {
            self.conn
                .query::<i64>(cmd("HSET").arg(&composite).arg(field).arg(bytes))
                .await?;
            debug!("✓ Redis HSET {} {}", composite, field);
        } else {
            self.conn
                .query::<i64>(
                    cmd("HSETEX")
                        .arg(&composite)
                        .arg("PX")
                        .arg(millis(ttl))
                        .arg("FIELDS")
                        .arg(1)
                        .arg(field)
                        .arg(bytes),
                )
                .await?;
            debug!("✓ Redis HSETEX {} {} (TTL: {:?})", composite, field, ttl);
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<T>> {
        let composite = self.keys.compose(key);
        let bytes: Option<Vec<u8>> = match self.touch_ttl() {
            Some(ttl) => {
                let mut values: Vec<Option<Vec<u8>>> = self
                    .conn
                    .query(
                        cmd("HGETEX")
                            .arg(&composite)
                            .arg("PX")
                            .arg(millis(ttl))
                            .arg("FIELDS")
                            .arg(1)
                            .arg(field),
                    )
                    .await?;
                values.pop().flatten()
            }
            None => self.conn.query(cmd("HGET").arg(&composite).arg(field)).await?,
        };

        debug!(
            "✓ Redis HGET {} {} -> {}",
            composite,
            field,
            if bytes.is_some() { "HIT" } else { "MISS" }
        );
        bytes.map(|bytes| self.decode(&composite, &bytes)).transpose()
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, T>> {
        let composite = self.keys.compose(key);
        let raw: HashMap<String, Vec<u8>> = self.conn.query(cmd("HGETALL").arg(&composite)).await?;

        let mut fields = HashMap::with_capacity(raw.len());
        for (field, bytes) in raw {
            fields.insert(field, self.decode(&composite, &bytes)?);
        }
        debug!("✓ Redis HGETALL {} ({} fields)", composite, fields.len());
        Ok(fields)
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let composite = self.keys.compose(key);
        let removed: u64 = self
            .conn
            .query(cmd("HDEL").arg(&composite).arg(fields))
            .await?;
        debug!("✓ Redis HDEL {} ({} removed)", composite, removed);
        Ok(())
    }

    async fn hexpire(&self, key: &str, field: &str, ttl: Duration) -> Result<bool> {
        let composite = self.keys.compose(key);
        let codes: Vec<i64> = self
            .conn
            .query(
                cmd("HPEXPIRE")
                    .arg(&composite)
                    .arg(millis(ttl))
                    .arg("FIELDS")
                    .arg(1)
                    .arg(field),
            )
            .await?;

        let applied = codes.first() == Some(&1);
        debug!("✓ Redis HEXPIRE {} {} ({:?}) -> {}", composite, field, ttl, applied);
        Ok(applied)
    }

    async fn httl(&self, key: &str, field: &str) -> Result<FieldTtl> {
        let composite = self.keys.compose(key);
        let codes: Vec<i64> = self
            .conn
            .query(cmd("HTTL").arg(&composite).arg("FIELDS").arg(1).arg(field))
            .await?;

        let ttl = codes
            .first()
            .map(|code| FieldTtl::from_reply(*code))
            .ok_or_else(|| Error::BackendError(format!("empty HTTL reply for {}", composite)))?;
        Ok(ttl)
    }

    async fn lock(&self, key: &str) -> Result<LockGuard> {
        self.locker.lock(key).await
    }

    async fn try_lock(&self, key: &str) -> Result<LockGuard> {
        self.locker.try_lock(key).await
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::REMOTE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheMode;

    const TEST_REDIS_URL: &str = "redis://localhost:6379";

    #[test]
    fn test_millis_never_zero() {
        assert_eq!(millis(Duration::ZERO), 1);
        assert_eq!(millis(Duration::from_micros(10)), 1);
        assert_eq!(millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::MAX), u64::MAX);
        assert_eq!(millis(Duration::from_secs(u64::MAX / 1000)), u64::MAX / 1000 * 1000);
    }

    #[tokio::test]
    async fn test_remote_requires_address() {
        let config = CacheConfig::<String>::new("c").with_mode(CacheMode::Remote);
        let result = RemoteCache::new(&config).await;
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    // Integration tests - require running Redis server
    // Uncomment and run with: cargo test --features redis -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_remote_cache_health_check() {
        let config = CacheConfig::<String>::new("unit")
            .with_mode(CacheMode::Remote)
            .with_remote_address(TEST_REDIS_URL);
        let cache = RemoteCache::new(&config).await.expect("Failed to create cache");
        assert!(cache.health_check().await.expect("Failed to ping"));
    }

    #[tokio::test]
    #[ignore]
    async fn test_remote_cache_set_get() {
        let config = CacheConfig::<String>::new("unit")
            .with_mode(CacheMode::Remote)
            .with_remote_address(TEST_REDIS_URL);
        let cache = RemoteCache::new(&config).await.expect("Failed to create cache");

        cache
            .set("test_key", "test_value".to_string())
            .await
            .expect("Failed to set");

        let result = cache.get("test_key").await.expect("Failed to get");
        assert_eq!(result.as_deref(), Some("test_value"));
        cache.delete("test_key").await.expect("Failed to delete");
    }
}
