//! Cache configuration.
//!
//! A [`CacheConfig`] is an immutable snapshot taken when the cache is built: mode,
//! namespace, TTL policy and serializer never change for the lifetime of a cache.
//!
//! # Example
//!
//! ```rust
//! use svc_cache::{CacheConfig, CacheMode};
//! use std::time::Duration;
//!
//! let config = CacheConfig::<String>::new("sessions")
//!     .with_mode(CacheMode::Remote)
//!     .with_remote_address("localhost:6379")
//!     .with_default_ttl(Duration::from_secs(1800))
//!     .with_touch(true);
//!
//! assert_eq!(config.name, "sessions");
//! assert!(config.apply_touch);
//! ```

use crate::error::{Error, Result};
use crate::serialization::{DefaultSerDe, SerDe};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Default remote connection pool size.
/// Formula: (CPU cores × 2) + 1
/// For 8-core systems: 16 connections is optimal
/// Override with REDIS_POOL_SIZE environment variable
pub const DEFAULT_POOL_SIZE: usize = 16;

/// Lock lease used when no default TTL is configured.
pub const DEFAULT_LOCK_VALIDITY: Duration = Duration::from_secs(5);

/// Which engine backs a cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CacheMode {
    /// In-process moka cache.
    #[default]
    Local,
    /// Single Redis/Valkey server.
    Remote,
    /// Redis/Valkey cluster; read-only commands may go to replicas.
    Cluster,
    /// Primary discovered through a sentinel quorum.
    Sentinel,
}

impl CacheMode {
    pub fn is_local(self) -> bool {
        self == CacheMode::Local
    }

    /// Lock replicas that must agree for a lock to be held.
    ///
    /// Standalone servers use a single lock key; distributed topologies use three
    /// keys and require two, tolerating the loss of one.
    pub fn key_majority(self) -> usize {
        match self {
            CacheMode::Cluster | CacheMode::Sentinel => 2,
            CacheMode::Local | CacheMode::Remote => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheMode::Local => "local",
            CacheMode::Remote => "remote",
            CacheMode::Cluster => "cluster",
            CacheMode::Sentinel => "sentinel",
        }
    }
}

impl FromStr for CacheMode {
    type Err = Infallible;

    /// `"local"` selects the local engine; anything unrecognised is a standalone
    /// remote server.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "local" => CacheMode::Local,
            "cluster" => CacheMode::Cluster,
            "sentinel" => CacheMode::Sentinel,
            _ => CacheMode::Remote,
        })
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for one cache instance.
pub struct CacheConfig<T> {
    pub mode: CacheMode,
    /// Namespace prefix for every key.
    pub name: String,
    /// `scheme://host:port[?params]`; the scheme defaults to `redis://`.
    pub remote_address: String,
    /// Zero means entries written with `set` never expire. See also `apply_touch`.
    pub default_ttl: Duration,
    /// Cost budget of the local engine. Zero selects the default budget.
    pub max_elements: u64,
    /// Extend the TTL back to `default_ttl` on every successful read.
    pub apply_touch: bool,
    pub serializer: Arc<dyn SerDe<T>>,
    /// Lock lease length; `None` falls back to `default_ttl`, then 5 seconds.
    pub lock_validity: Option<Duration>,
    pub pool_size: usize,
}

impl<T> CacheConfig<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    /// Local cache using the type-aware [`DefaultSerDe`].
    pub fn new(name: impl Into<String>) -> Self {
        Self::new_with_serializer(name, DefaultSerDe::<T>::new())
    }

    /// Build a configuration from `CACHE_*` environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CACHE_MODE` | `local` |
    /// | `CACHE_NAME` | `cache` |
    /// | `CACHE_REMOTE_ADDR` | empty |
    /// | `CACHE_DEFAULT_TTL_SECS` | `0` |
    /// | `CACHE_MAX_ELEMENTS` | `0` |
    /// | `CACHE_APPLY_TOUCH` | `false` |
    /// | `REDIS_POOL_SIZE` | `16` |
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if a numeric or boolean variable does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let name = lookup("CACHE_NAME").unwrap_or_else(|| "cache".to_string());
        let mut config = Self::new(name);

        if let Some(mode) = lookup("CACHE_MODE") {
            config.mode = mode.parse().unwrap_or_default();
        }
        if let Some(addr) = lookup("CACHE_REMOTE_ADDR") {
            config.remote_address = addr;
        }
        if let Some(secs) = lookup("CACHE_DEFAULT_TTL_SECS") {
            config.default_ttl = Duration::from_secs(parse_var("CACHE_DEFAULT_TTL_SECS", &secs)?);
        }
        if let Some(max) = lookup("CACHE_MAX_ELEMENTS") {
            config.max_elements = parse_var("CACHE_MAX_ELEMENTS", &max)?;
        }
        if let Some(touch) = lookup("CACHE_APPLY_TOUCH") {
            config.apply_touch = parse_var("CACHE_APPLY_TOUCH", &touch)?;
        }
        if let Some(size) = lookup("REDIS_POOL_SIZE") {
            config.pool_size = parse_var("REDIS_POOL_SIZE", &size)?;
        }

        Ok(config)
    }
}

impl<T> CacheConfig<T> {
    /// Local cache with an explicit serialization strategy.
    ///
    /// Use this for types that are not serde types, e.g. prost messages with
    /// [`ProtoSerDe`](crate::serialization::ProtoSerDe).
    pub fn new_with_serializer(name: impl Into<String>, serializer: impl SerDe<T> + 'static) -> Self {
        CacheConfig {
            mode: CacheMode::Local,
            name: name.into(),
            remote_address: String::new(),
            default_ttl: Duration::ZERO,
            max_elements: 0,
            apply_touch: false,
            serializer: Arc::new(serializer),
            lock_validity: None,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = address.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_max_elements(mut self, max_elements: u64) -> Self {
        self.max_elements = max_elements;
        self
    }

    pub fn with_touch(mut self, apply_touch: bool) -> Self {
        self.apply_touch = apply_touch;
        self
    }

    pub fn with_serializer(mut self, serializer: impl SerDe<T> + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    pub fn with_lock_validity(mut self, validity: Duration) -> Self {
        self.lock_validity = Some(validity);
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Default TTL, or `None` when entries should not expire.
    pub fn ttl(&self) -> Option<Duration> {
        (!self.default_ttl.is_zero()).then_some(self.default_ttl)
    }

    /// Lease length applied to locks taken through this cache.
    pub fn effective_lock_validity(&self) -> Duration {
        self.lock_validity
            .filter(|v| !v.is_zero())
            .or_else(|| self.ttl())
            .unwrap_or(DEFAULT_LOCK_VALIDITY)
    }

    /// Check the configuration before an engine is built.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` when a remote mode has no address or the pool
    /// size is zero.
    pub fn validate(&self) -> Result<()> {
        if !self.mode.is_local() {
            if self.remote_address.trim().is_empty() {
                return Err(Error::ConfigError(format!(
                    "{} mode requires a remote address",
                    self.mode
                )));
            }
            if self.pool_size == 0 {
                return Err(Error::ConfigError(
                    "pool size must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl<T> Clone for CacheConfig<T> {
    fn clone(&self) -> Self {
        CacheConfig {
            mode: self.mode,
            name: self.name.clone(),
            remote_address: self.remote_address.clone(),
            default_ttl: self.default_ttl,
            max_elements: self.max_elements,
            apply_touch: self.apply_touch,
            serializer: Arc::clone(&self.serializer),
            lock_validity: self.lock_validity,
            pool_size: self.pool_size,
        }
    }
}

impl<T> fmt::Debug for CacheConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("mode", &self.mode)
            .field("name", &self.name)
            .field("remote_address", &self.remote_address)
            .field("default_ttl", &self.default_ttl)
            .field("max_elements", &self.max_elements)
            .field("apply_touch", &self.apply_touch)
            .field("serializer", &self.serializer.name())
            .field("lock_validity", &self.lock_validity)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

fn parse_var<V: FromStr>(name: &str, raw: &str) -> Result<V>
where
    V::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::ConfigError(format!("invalid {}={:?}: {}", name, raw, e)))
}
