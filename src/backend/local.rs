//! In-process cache engine (default, thread-safe, async).
//!
//! Backed by moka: TinyLFU admission decides whether a new entry is worth keeping,
//! and eviction works against a cost budget (one unit per entry, one per field for
//! hashes). Per-entry TTLs are enforced by an expiry policy inside moka, so an
//! expired entry is never returned.
//!
//! Compared to the remote engine this one is weaker in documented ways, reported
//! by [`Capabilities::LOCAL`]:
//! - counters are a read-modify-write and may race,
//! - a hash has one TTL for all of its fields,
//! - `expire` evicts the key instead of changing its TTL,
//! - locks only exclude tasks of this process.

use super::{Cache, Capabilities, FieldTtl};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::key::KeySpace;
use crate::lock::{LockGuard, LockTable};
use crate::serialization::SerDe;
use moka::future::Cache as MokaCache;
use moka::Expiry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cost budget used when `max_elements` is zero (1 GiB worth of unit-cost entries).
pub const DEFAULT_MAX_COST: u64 = 1 << 30;

/// What a key holds.
#[derive(Clone)]
enum Slot<T> {
    Value(T),
    Counter(i64),
    Hash(HashMap<String, T>),
}

/// How a write affects the key's expiration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifetime {
    /// Keep whatever remains of the current TTL.
    Keep,
    After(Duration),
    Never,
}

impl Lifetime {
    fn from_ttl(ttl: Option<Duration>) -> Self {
        match ttl {
            Some(ttl) if !ttl.is_zero() => Lifetime::After(ttl),
            _ => Lifetime::Never,
        }
    }
}

#[derive(Clone)]
struct Entry<T> {
    slot: Slot<T>,
    lifetime: Lifetime,
}

impl<T> Entry<T> {
    fn cost(&self) -> u32 {
        match &self.slot {
            Slot::Hash(fields) => u32::try_from(fields.len()).unwrap_or(u32::MAX).max(1),
            Slot::Value(_) | Slot::Counter(_) => 1,
        }
    }
}

/// Expiry policy: TTL chosen by each write, optionally reset by reads.
struct EntryExpiry {
    touch: Option<Duration>,
}

impl<T> Expiry<String, Entry<T>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry<T>,
        _created_at: Instant,
    ) -> Option<Duration> {
        match value.lifetime {
            Lifetime::After(ttl) => Some(ttl),
            Lifetime::Keep | Lifetime::Never => None,
        }
    }

    fn expire_after_read(
        &self,
        _key: &String,
        _value: &Entry<T>,
        _read_at: Instant,
        duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        self.touch.or(duration_until_expiry)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry<T>,
        _updated_at: Instant,
        duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        match value.lifetime {
            Lifetime::After(ttl) => Some(ttl),
            Lifetime::Never => None,
            Lifetime::Keep => duration_until_expiry,
        }
    }
}

/// Thread-safe in-process cache engine.
///
/// Writes go through moka's admission buffer: a `set` immediately followed by a
/// `get` from another task may still miss. Tests allow a short settle delay.
///
/// # Example
///
/// ```no_run
/// use svc_cache::backend::{Cache, LocalCache};
/// use svc_cache::CacheConfig;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = CacheConfig::<String>::new("users").with_default_ttl(Duration::from_secs(60));
///     let cache = LocalCache::new(&config);
///
///     cache.set("alice", "admin".to_string()).await?;
///     let role = cache.get("alice").await?;
///     assert_eq!(role.as_deref(), Some("admin"));
///     Ok(())
/// }
/// ```
pub struct LocalCache<T> {
    keys: KeySpace,
    store: MokaCache<String, Entry<T>>,
    default_ttl: Option<Duration>,
    lock_validity: Duration,
    serializer: Arc<dyn SerDe<T>>,
    locks: Arc<LockTable>,
}

impl<T> LocalCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an engine owning its own store.
    pub fn new(config: &CacheConfig<T>) -> Self {
        let max_cost = if config.max_elements == 0 {
            DEFAULT_MAX_COST
        } else {
            config.max_elements
        };
        let touch = if config.apply_touch { config.ttl() } else { None };

        let store = MokaCache::builder()
            .name(&config.name)
            .max_capacity(max_cost)
            .weigher(|_key: &String, entry: &Entry<T>| entry.cost())
            .expire_after(EntryExpiry { touch })
            .build();

        debug!(
            "✓ Local cache {} initialized (cost budget: {}, touch: {})",
            config.name,
            max_cost,
            touch.is_some()
        );

        LocalCache {
            keys: KeySpace::new(config.name.clone()),
            store,
            default_ttl: config.ttl(),
            lock_validity: config.effective_lock_validity(),
            serializer: Arc::clone(&config.serializer),
            locks: Arc::new(LockTable::new()),
        }
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.store.entry_count()
    }

    /// Flush moka's pending admission and eviction work.
    pub async fn run_pending_tasks(&self) {
        self.store.run_pending_tasks().await;
    }

    /// Drop every entry and lock owned by this engine.
    pub fn close(&self) {
        self.store.invalidate_all();
        self.locks.clear();
        warn!("⚠ Local cache {} closed - all entries cleared!", self.keys.name());
    }

    async fn write(&self, composite: String, slot: Slot<T>, lifetime: Lifetime) {
        self.store.insert(composite, Entry { slot, lifetime }).await;
    }

    /// Integer view of a stored slot, through the serializer's text form.
    fn as_integer(&self, composite: &str, slot: &Slot<T>) -> Result<i64> {
        match slot {
            Slot::Counter(n) => Ok(*n),
            Slot::Value(value) => {
                let bytes = self.serializer.serialize(value)?;
                std::str::from_utf8(&bytes)
                    .ok()
                    .and_then(|text| text.trim().parse::<i64>().ok())
                    .ok_or_else(|| {
                        Error::WrongType(format!("value at {} is not an integer", composite))
                    })
            }
            Slot::Hash(_) => Err(Error::WrongType(format!(
                "{} holds a hash, not an integer",
                composite
            ))),
        }
    }

    async fn write_field(&self, key: &str, field: &str, value: T, ttl: Option<Duration>) -> Result<()> {
        let composite = self.keys.compose(key);
        let (mut fields, lifetime) = match self.store.get(&composite).await {
            None => (HashMap::new(), Lifetime::from_ttl(ttl.or(self.default_ttl))),
            Some(Entry {
                slot: Slot::Hash(fields),
                ..
            }) => {
                let lifetime = match ttl {
                    Some(_) => Lifetime::from_ttl(ttl),
                    None => Lifetime::Keep,
                };
                (fields, lifetime)
            }
            Some(_) => {
                return Err(Error::WrongType(format!(
                    "{} does not hold a hash",
                    composite
                )))
            }
        };

        fields.insert(field.to_string(), value);
        self.write(composite.clone(), Slot::Hash(fields), lifetime).await;
        debug!("✓ Local HSET {} {} ({:?})", composite, field, lifetime);
        Ok(())
    }
}

impl<T> Clone for LocalCache<T> {
    fn clone(&self) -> Self {
        LocalCache {
            keys: self.keys.clone(),
            store: self.store.clone(),
            default_ttl: self.default_ttl,
            lock_validity: self.lock_validity,
            serializer: Arc::clone(&self.serializer),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<T> Cache<T> for LocalCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<T>> {
        let composite = self.keys.compose(key);
        let value = match self.store.get(&composite).await.map(|entry| entry.slot) {
            Some(Slot::Value(value)) => Some(value),
            // Counters read back through the serializer, as they would remotely.
            Some(Slot::Counter(n)) => self.serializer.deserialize(n.to_string().as_bytes()).ok(),
            Some(Slot::Hash(_)) | None => None,
        };

        if value.is_some() {
            debug!("✓ Local GET {} -> HIT", composite);
        } else {
            debug!("✓ Local GET {} -> MISS", composite);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: T) -> Result<()> {
        let composite = self.keys.compose(key);
        self.write(composite.clone(), Slot::Value(value), Lifetime::from_ttl(self.default_ttl))
            .await;
        debug!("✓ Local SET {}", composite);
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: T, ttl: Duration) -> Result<()> {
        let composite = self.keys.compose(key);
        self.write(composite.clone(), Slot::Value(value), Lifetime::from_ttl(Some(ttl)))
            .await;
        debug!("✓ Local SET {} (TTL: {:?})", composite, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let composite = self.keys.compose(key);
        self.store.invalidate(&composite).await;
        debug!("✓ Local DELETE {}", composite);
        Ok(())
    }

    async fn delete_multi(&self, keys: &[&str]) -> Result<u64> {
        let mut removed = 0;
        for key in keys {
            if self.store.remove(&self.keys.compose(key)).await.is_some() {
                removed += 1;
            }
        }

        debug!("✓ Local MDELETE {} keys ({} removed)", keys.len(), removed);
        Ok(removed)
    }

    /// Evicts the key: moka cannot change a live entry's TTL.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let composite = self.keys.compose(key);
        self.store.invalidate(&composite).await;
        debug!("✓ Local EXPIRE {} ({:?}) -> evicted", composite, ttl);
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        let composite = self.keys.compose(key);
        let (current, lifetime) = match self.store.get(&composite).await {
            Some(entry) => (self.as_integer(&composite, &entry.slot)?, Lifetime::Keep),
            None => (0, Lifetime::Never),
        };

        let next = current.checked_add(delta).ok_or_else(|| {
            Error::WrongType(format!("increment of {} would overflow", composite))
        })?;
        self.write(composite.clone(), Slot::Counter(next), lifetime).await;
        debug!("✓ Local INCRBY {} {} -> {}", composite, delta, next);
        Ok(next)
    }

    async fn decrement(&self, key: &str, delta: i64) -> Result<i64> {
        let negated = delta
            .checked_neg()
            .ok_or_else(|| Error::WrongType(format!("decrement by {} would overflow", delta)))?;
        self.increment(key, negated).await
    }

    async fn hset(&self, key: &str, field: &str, value: T) -> Result<()> {
        self.write_field(key, field, value, None).await
    }

    /// Applies `ttl` to the whole hash, not just `field`.
    async fn hset_with_ttl(&self, key: &str, field: &str, value: T, ttl: Duration) -> Result<()> {
        self.write_field(key, field, value, Some(ttl)).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<T>> {
        let composite = self.keys.compose(key);
        let value = match self.store.get(&composite).await.map(|entry| entry.slot) {
            Some(Slot::Hash(mut fields)) => fields.remove(field),
            _ => None,
        };

        debug!(
            "✓ Local HGET {} {} -> {}",
            composite,
            field,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, T>> {
        let composite = self.keys.compose(key);
        match self.store.get(&composite).await.map(|entry| entry.slot) {
            Some(Slot::Hash(fields)) => Ok(fields),
            None => Ok(HashMap::new()),
            Some(_) => Err(Error::WrongType(format!(
                "{} does not hold a hash",
                composite
            ))),
        }
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<()> {
        let composite = self.keys.compose(key);
        let mut remaining = match self.store.get(&composite).await.map(|entry| entry.slot) {
            Some(Slot::Hash(existing)) => existing,
            None => return Ok(()),
            Some(_) => {
                return Err(Error::WrongType(format!(
                    "{} does not hold a hash",
                    composite
                )))
            }
        };

        for field in fields {
            remaining.remove(*field);
        }

        if remaining.is_empty() {
            self.store.invalidate(&composite).await;
        } else {
            self.write(composite.clone(), Slot::Hash(remaining), Lifetime::Keep)
                .await;
        }
        debug!("✓ Local HDEL {} ({} fields)", composite, fields.len());
        Ok(())
    }

    /// Field TTLs are not materialized locally; always `false`.
    async fn hexpire(&self, key: &str, field: &str, ttl: Duration) -> Result<bool> {
        debug!(
            "✓ Local HEXPIRE {} {} ({:?}) -> unsupported, ignored",
            self.keys.compose(key),
            field,
            ttl
        );
        Ok(false)
    }

    /// `Persistent` for any existing field, since field TTLs are not tracked.
    async fn httl(&self, key: &str, field: &str) -> Result<FieldTtl> {
        let composite = self.keys.compose(key);
        let exists = matches!(
            self.store.get(&composite).await.map(|entry| entry.slot),
            Some(Slot::Hash(fields)) if fields.contains_key(field)
        );
        Ok(if exists {
            FieldTtl::Persistent
        } else {
            FieldTtl::Missing
        })
    }

    /// Same as `try_lock`: the in-process table does not queue waiters.
    async fn lock(&self, key: &str) -> Result<LockGuard> {
        self.try_lock(key).await
    }

    async fn try_lock(&self, key: &str) -> Result<LockGuard> {
        self.locks
            .try_acquire(&self.keys.compose(key), self.lock_validity)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::LOCAL
    }
}
