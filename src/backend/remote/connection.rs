//! Shared Redis/Valkey connection pool.
//!
//! One pool per process, created by the first remote cache and reused by every
//! later one regardless of its address. Closing a cache never closes the pool;
//! call [`shutdown_shared_connection`] at process exit if needed.

use crate::config::CacheMode;
use crate::error::{Error, Result};
use deadpool_redis::redis::{Cmd, FromRedisValue, IntoConnectionInfo};
use deadpool_redis::{PoolConfig, Runtime};
use tokio::sync::OnceCell;

static SHARED: OnceCell<SharedConnection> = OnceCell::const_new();

/// Pool statistics information.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub connections: u32,
    pub idle_connections: u32,
}

/// Parsed remote address.
///
/// Accepted forms:
/// - `host:port` or `redis://host:port/db` for a single server,
/// - `redis://host:7001?addr=host:7002&addr=host:7003` for a cluster,
/// - `redis://host:26379?addr=host:26380&master_set=primary` for sentinels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConnectionSpec {
    pub mode: CacheMode,
    /// Every node URL, without query parameters.
    pub nodes: Vec<String>,
    pub master_set: Option<String>,
}

impl ConnectionSpec {
    pub(crate) fn parse(mode: CacheMode, address: &str) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::ConfigError("empty remote address".to_string()));
        }

        let address = if address.contains("://") {
            address.to_string()
        } else {
            format!("redis://{}", address)
        };

        let (base, query) = match address.split_once('?') {
            Some((base, query)) => (base.to_string(), query),
            None => (address.clone(), ""),
        };

        let scheme = base.split("://").next().unwrap_or("redis").to_string();
        let mut nodes = vec![base];
        let mut master_set = None;

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            match name {
                "addr" if !value.is_empty() => {
                    nodes.push(format!("{}://{}", scheme, value));
                }
                "master_set" if !value.is_empty() => master_set = Some(value.to_string()),
                _ => debug!("Ignoring remote address parameter {}", name),
            }
        }

        for node in &nodes {
            node.as_str().into_connection_info().map_err(|e| {
                Error::ConfigError(format!("malformed remote address {}: {}", node, e))
            })?;
        }

        if mode == CacheMode::Sentinel && master_set.is_none() {
            return Err(Error::ConfigError(
                "sentinel address requires a master_set parameter".to_string(),
            ));
        }

        Ok(ConnectionSpec {
            mode,
            nodes,
            master_set,
        })
    }
}

/// A pooled connection to whichever topology was configured.
pub(crate) enum SharedConnection {
    Standalone(deadpool_redis::Pool),
    Cluster(deadpool_redis::cluster::Pool),
    Sentinel(deadpool_redis::sentinel::Pool),
}

impl SharedConnection {
    /// Return the process-wide connection, creating it from `spec` on first use.
    ///
    /// Later callers get the existing pool; their `spec` has still been parsed, so
    /// a malformed address fails before reaching here.
    ///
    /// # Errors
    /// Returns `Err` if the pool cannot be built.
    pub(crate) async fn get_or_init(
        spec: &ConnectionSpec,
        pool_size: usize,
    ) -> Result<&'static SharedConnection> {
        SHARED
            .get_or_try_init(|| async { Self::connect(spec, pool_size) })
            .await
    }

    fn connect(spec: &ConnectionSpec, pool_size: usize) -> Result<Self> {
        let pool = Some(PoolConfig::new(pool_size));

        let connection = match spec.mode {
            CacheMode::Cluster => {
                let mut cfg = deadpool_redis::cluster::Config::from_urls(spec.nodes.clone());
                cfg.read_from_replicas = true;
                cfg.pool = pool;
                let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
                    Error::BackendError(format!("Failed to create Redis cluster pool: {}", e))
                })?;
                SharedConnection::Cluster(pool)
            }
            CacheMode::Sentinel => {
                let master = spec.master_set.clone().ok_or_else(|| {
                    Error::ConfigError("sentinel address requires a master_set parameter".to_string())
                })?;
                let mut cfg = deadpool_redis::sentinel::Config::from_urls(
                    spec.nodes.clone(),
                    master,
                    deadpool_redis::sentinel::SentinelServerType::Master,
                );
                cfg.pool = pool;
                let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
                    Error::BackendError(format!("Failed to create Redis sentinel pool: {}", e))
                })?;
                SharedConnection::Sentinel(pool)
            }
            CacheMode::Remote | CacheMode::Local => {
                let mut cfg = deadpool_redis::Config::from_url(spec.nodes[0].clone());
                cfg.pool = pool;
                let pool = cfg
                    .create_pool(Some(Runtime::Tokio1))
                    .map_err(|e| Error::BackendError(format!("Failed to create Redis pool: {}", e)))?;
                SharedConnection::Standalone(pool)
            }
        };

        info!(
            "✓ Redis {} connection initialized: {} node(s) (pool size: {})",
            spec.mode,
            spec.nodes.len(),
            pool_size
        );
        Ok(connection)
    }

    /// Run one command on a pooled connection.
    pub(crate) async fn query<V: FromRedisValue>(&self, cmd: &Cmd) -> Result<V> {
        let value: V = match self {
            SharedConnection::Standalone(pool) => {
                let mut conn = pool.get().await?;
                cmd.query_async(&mut *conn).await?
            }
            SharedConnection::Cluster(pool) => {
                let mut conn = pool.get().await?;
                cmd.query_async(&mut *conn).await?
            }
            SharedConnection::Sentinel(pool) => {
                let mut conn = pool.get().await?;
                cmd.query_async(&mut *conn).await?
            }
        };
        Ok(value)
    }

    pub(crate) fn pool_stats(&self) -> PoolStats {
        let status = match self {
            SharedConnection::Standalone(pool) => pool.status(),
            SharedConnection::Cluster(pool) => pool.status(),
            SharedConnection::Sentinel(pool) => pool.status(),
        };
        PoolStats {
            connections: status.size as u32,
            idle_connections: status.available as u32,
        }
    }

    fn close(&self) {
        match self {
            SharedConnection::Standalone(pool) => pool.close(),
            SharedConnection::Cluster(pool) => pool.close(),
            SharedConnection::Sentinel(pool) => pool.close(),
        }
    }
}

/// Close the process-wide pool. Remote caches created afterwards fail to connect.
pub fn shutdown_shared_connection() {
    if let Some(connection) = SHARED.get() {
        connection.close();
        warn!("⚠ Shared Redis connection closed");
    }
}
