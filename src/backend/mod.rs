//! Cache engine implementations.

use crate::error::Result;
use crate::lock::LockGuard;
use std::collections::HashMap;
use std::time::Duration;

#[cfg(feature = "inmemory")]
pub mod local;
#[cfg(feature = "redis")]
pub mod remote;

#[cfg(feature = "inmemory")]
pub use local::LocalCache;
#[cfg(feature = "redis")]
pub use remote::{shutdown_shared_connection, PoolStats, RemoteCache};

/// Uniform operation surface of every cache engine.
///
/// Keys are caller keys; engines prefix them with the cache name before touching
/// storage. Misses are `Ok(None)`, never errors.
///
/// **IMPORTANT:** All methods use `&self` so one engine can be shared across tasks.
/// Engines use interior mutability (moka, DashMap) or external storage.
///
/// **CANCELLATION:** dropping a returned future cancels the operation. Remote calls
/// abort the in-flight request; local calls complete synchronously once polled.
#[allow(async_fn_in_trait)]
pub trait Cache<T>: Send + Sync {
    /// Retrieve a value.
    ///
    /// With `apply_touch` the entry's TTL is reset to the default TTL in the same step.
    ///
    /// # Errors
    /// Returns `Err` if the backend fails or stored bytes do not decode.
    async fn get(&self, key: &str) -> Result<Option<T>>;

    /// Store a value, applying the default TTL when one is configured.
    ///
    /// # Errors
    /// Returns `Err` if serialization or the backend fails.
    async fn set(&self, key: &str, value: T) -> Result<()>;

    /// Store a value with an explicit TTL. A zero TTL stores without expiration.
    ///
    /// # Errors
    /// Returns `Err` if serialization or the backend fails.
    async fn set_with_ttl(&self, key: &str, value: T, ttl: Duration) -> Result<()>;

    /// Remove a key. Removing an absent key is not an error.
    ///
    /// # Errors
    /// Returns `Err` if the backend fails.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove many keys in one round trip.
    ///
    /// Returns how many of them existed. An empty slice returns 0 without touching
    /// the backend.
    ///
    /// # Errors
    /// Returns `Err` only if the batch call itself fails.
    async fn delete_multi(&self, keys: &[&str]) -> Result<u64>;

    /// Set the remaining TTL of a key.
    ///
    /// # Errors
    /// Returns `Err` if the backend fails.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Add `delta` to the integer stored at `key` (missing keys start at 0).
    ///
    /// # Errors
    /// Returns `Error::WrongType` if the stored value is not an integer.
    async fn increment(&self, key: &str, delta: i64) -> Result<i64>;

    /// Subtract `delta` from the integer stored at `key`.
    ///
    /// # Errors
    /// Returns `Error::WrongType` if the stored value is not an integer.
    async fn decrement(&self, key: &str, delta: i64) -> Result<i64>;

    /// Set one field of a hash.
    ///
    /// # Errors
    /// Returns `Err` if serialization or the backend fails.
    async fn hset(&self, key: &str, field: &str, value: T) -> Result<()>;

    /// Set one field of a hash with its own TTL.
    ///
    /// Remote engines expire the field alone; the local engine applies the TTL to
    /// the whole hash (see [`Capabilities::field_ttl`]).
    ///
    /// # Errors
    /// Returns `Err` if serialization or the backend fails.
    async fn hset_with_ttl(&self, key: &str, field: &str, value: T, ttl: Duration) -> Result<()>;

    /// Get one field of a hash, touching its TTL when `apply_touch` is set.
    ///
    /// # Errors
    /// Returns `Err` if the backend fails or stored bytes do not decode.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<T>>;

    /// Get every live field of a hash. A missing hash is an empty map.
    ///
    /// # Errors
    /// Returns `Err` if the backend fails or any field does not decode.
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, T>>;

    /// Delete fields from a hash.
    ///
    /// # Errors
    /// Returns `Err` if the backend fails.
    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<()>;

    /// Set the TTL of an existing hash field. Returns `true` if it was applied.
    ///
    /// # Errors
    /// Returns `Err` if the backend fails.
    async fn hexpire(&self, key: &str, field: &str, ttl: Duration) -> Result<bool>;

    /// Remaining TTL of a hash field.
    ///
    /// # Errors
    /// Returns `Err` if the backend fails.
    async fn httl(&self, key: &str, field: &str) -> Result<FieldTtl>;

    /// Acquire a lock on `key`, waiting while it is held elsewhere.
    ///
    /// Bound the wait with `tokio::time::timeout` or by dropping the future.
    ///
    /// # Errors
    /// Returns `Error::NotLocked` where the engine cannot wait (local), or a backend
    /// error.
    async fn lock(&self, key: &str) -> Result<LockGuard>;

    /// Acquire a lock on `key` without waiting.
    ///
    /// # Errors
    /// Returns `Error::NotLocked` if the lock is held.
    async fn try_lock(&self, key: &str) -> Result<LockGuard>;

    /// Guarantees this engine gives.
    fn capabilities(&self) -> Capabilities;
}

/// Remaining lifetime of a hash field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldTtl {
    /// The field (or the whole hash) does not exist.
    Missing,
    /// The field exists without expiration.
    Persistent,
    /// The field expires after this long.
    Expires(Duration),
}

impl FieldTtl {
    /// Decode an `HTTL` reply: `-2` missing, `-1` persistent, otherwise seconds.
    pub fn from_reply(code: i64) -> Self {
        match code {
            -2 => FieldTtl::Missing,
            c if c < 0 => FieldTtl::Persistent,
            secs => FieldTtl::Expires(Duration::from_secs(secs as u64)),
        }
    }

    /// Inverse of [`from_reply`](Self::from_reply).
    pub fn as_secs(&self) -> i64 {
        match self {
            FieldTtl::Missing => -2,
            FieldTtl::Persistent => -1,
            FieldTtl::Expires(d) => d.as_secs() as i64,
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, FieldTtl::Missing)
    }
}

/// Behavioural differences between engines.
///
/// The local engine trades guarantees for speed; callers that need one of these
/// should check before relying on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// `increment`/`decrement` are atomic under concurrent callers.
    pub atomic_counters: bool,
    /// Hash fields carry independent TTLs (`hexpire`/`httl` are meaningful).
    pub field_ttl: bool,
    /// `expire` changes the TTL in place instead of evicting the key.
    pub live_expire: bool,
    /// Locks exclude other processes, not just other tasks of this one.
    pub distributed_lock: bool,
    /// `lock` waits for a held lock instead of failing fast.
    pub blocking_lock: bool,
}

impl Capabilities {
    pub const LOCAL: Capabilities = Capabilities {
        atomic_counters: false,
        field_ttl: false,
        live_expire: false,
        distributed_lock: false,
        blocking_lock: false,
    };

    pub const REMOTE: Capabilities = Capabilities {
        atomic_counters: true,
        field_ttl: true,
        live_expire: true,
        distributed_lock: true,
        blocking_lock: true,
    };
}
