//! Error types for the cache facade.

use std::fmt;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cache operations.
///
/// A cache miss is never an error: lookups return `Ok(None)`. The variants below
/// cover construction failures, backend failures and lock contention.
#[derive(Debug, Clone)]
pub enum Error {
    /// Serialization failed when converting a value to cache bytes.
    ///
    /// Raised by the configured [`SerDe`](crate::serialization::SerDe) strategy.
    SerializationError(String),

    /// Deserialization failed when converting cache bytes back to a value.
    ///
    /// Usually means the entry was written by another serializer or another type.
    /// **Recovery:** delete the entry and write it again.
    DeserializationError(String),

    /// Backend storage error (Redis/Valkey).
    ///
    /// Common causes:
    /// - Connection lost or server unreachable
    /// - Pool exhausted
    /// - Server rejected the command (e.g. `HSETEX` on a server without field TTL)
    ///
    /// The cache performs no internal retry; retry policy belongs to the caller.
    BackendError(String),

    /// Configuration error while constructing a cache.
    ///
    /// Common causes:
    /// - Malformed connection string
    /// - Sentinel address without `master_set`
    /// - Unparseable environment variable
    ConfigError(String),

    /// Feature not compiled in.
    ///
    /// Returned when a remote mode is requested without the `redis` Cargo feature.
    NotImplemented(String),

    /// The lock is held by someone else.
    ///
    /// Expected and recoverable: use it for skip-if-busy control flow, it is not a
    /// failure worth logging at error level.
    NotLocked,

    /// The stored entry has a different shape than the operation expects.
    ///
    /// Raised on hash writes over a plain value and counter updates over a value
    /// that is not an integer.
    WrongType(String),

    /// Generic error with custom message.
    Other(String),
}

impl Error {
    /// True for lock contention, the only error callers are expected to branch on.
    pub fn is_not_locked(&self) -> bool {
        matches!(self, Error::NotLocked)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::ConfigError(msg) => write!(f, "Config error: {}", msg),
            Error::NotImplemented(msg) => write!(f, "Not implemented: {}", msg),
            Error::NotLocked => write!(f, "lock not acquired"),
            Error::WrongType(msg) => write!(f, "Wrong type: {}", msg),
            Error::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Conversions from other error types
// ============================================================================

impl From<String> for Error {
    fn from(e: String) -> Self {
        Error::Other(e)
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::redis::RedisError> for Error {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        if e.code() == Some("WRONGTYPE") || e.to_string().contains("not an integer") {
            Error::WrongType(e.to_string())
        } else {
            Error::BackendError(format!("Redis error: {}", e))
        }
    }
}

#[cfg(feature = "redis")]
impl From<deadpool_redis::PoolError> for Error {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Error::BackendError(format!("Failed to get Redis connection: {}", e))
    }
}
