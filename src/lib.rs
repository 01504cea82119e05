//! # svc-cache
//!
//! A generic, type-safe cache for services, with one API over two engines.
//!
//! ## Features
//!
//! - **Fully Generic:** Cache any `T`; bytes are produced by a pluggable [`SerDe`](serialization::SerDe) strategy
//! - **Two Engines:** in-process moka cache, or Redis/Valkey (standalone, cluster, sentinel)
//! - **Rich Operations:** TTLs, read-touch, atomic counters, hashes with per-field TTL
//! - **Distributed Locks:** quorum locks with lease renewal and a cancellation context
//! - **Namespaced:** every key is prefixed with the cache name
//!
//! ## Quick Start
//!
//! ```no_run
//! use svc_cache::{new_cache, Cache, CacheConfig, CacheMode};
//! use std::time::Duration;
//!
//! # async fn example() -> svc_cache::Result<()> {
//! let config = CacheConfig::<String>::new("sessions")
//!     .with_mode(CacheMode::Local)
//!     .with_default_ttl(Duration::from_secs(1800))
//!     .with_touch(true);
//!
//! let (cache, release) = new_cache(config).await?;
//!
//! cache.set("user:123", "token".to_string()).await?;
//! let token = cache.get("user:123").await?;
//!
//! let visits = cache.increment("visits", 1).await?;
//!
//! match cache.try_lock("report").await {
//!     Ok(guard) => guard.release().await,
//!     Err(e) if e.is_not_locked() => { /* someone else is on it */ }
//!     Err(e) => return Err(e),
//! }
//!
//! release.release();
//! # Ok(())
//! # }
//! ```
//!
//! ## Cargo features
//!
//! | Feature | Default | Enables |
//! |---------|---------|---------|
//! | `inmemory` | yes | [`LocalCache`](backend::LocalCache) |
//! | `protobuf` | yes | [`ProtoSerDe`](serialization::ProtoSerDe) |
//! | `redis` | no | `RemoteCache` and the cluster/sentinel modes |

#[macro_use]
extern crate log;

#[cfg(not(any(feature = "inmemory", feature = "redis")))]
compile_error!("enable at least one engine feature: `inmemory` or `redis`");

pub mod backend;
pub mod config;
pub mod error;
pub mod key;
pub mod lock;
pub mod serialization;
pub mod service;

// Re-exports for convenience
pub use backend::{Cache, Capabilities, FieldTtl};
pub use config::{CacheConfig, CacheMode};
pub use error::{Error, Result};
pub use lock::{LockContext, LockGuard};
pub use service::{new_cache, CacheService, Release};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
