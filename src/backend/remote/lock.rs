//! Quorum lock over Redis/Valkey.
//!
//! A lock on `key` is a set of `2 * majority - 1` replica keys, each written with
//! `SET NX PX` and the holder's random token. The lock is held while a majority of
//! replicas carry the token. A background task extends the lease every half
//! validity period and cancels the guard's context if it falls below majority.

use super::connection::SharedConnection;
use super::millis;
use crate::error::{Error, Result};
use crate::key::KeySpace;
use crate::lock::{LockContext, LockGuard, Unlock};
use deadpool_redis::redis::cmd;
use futures::future::join_all;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};

/// Interval between attempts of a blocking `lock`.
pub const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Extend the lease only if the replica still carries our token.
const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
end
return 0
"#;

/// Delete the replica only if it still carries our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// Lock manager bound to one cache namespace.
#[derive(Clone)]
pub(crate) struct Locker {
    conn: &'static SharedConnection,
    keys: KeySpace,
    majority: usize,
    validity: Duration,
}

/// Outcome of one acquisition round.
enum Attempt {
    Acquired(Vec<String>),
    Busy,
}

impl Locker {
    pub(crate) fn new(
        conn: &'static SharedConnection,
        keys: KeySpace,
        majority: usize,
        validity: Duration,
    ) -> Self {
        Locker {
            conn,
            keys,
            majority: majority.max(1),
            validity,
        }
    }

    fn replicas(&self) -> usize {
        2 * self.majority - 1
    }

    fn replica_keys(&self, key: &str) -> Vec<String> {
        (0..self.replicas())
            .map(|replica| self.keys.lock_key(key, replica))
            .collect()
    }

    /// One non-blocking acquisition.
    ///
    /// # Errors
    /// `Error::NotLocked` under contention, a backend error if every replica failed
    /// without any sign of contention.
    pub(crate) async fn try_lock(&self, key: &str) -> Result<LockGuard> {
        let token = uuid::Uuid::now_v7().to_string();
        match self.attempt(key, &token).await? {
            Attempt::Acquired(held) => Ok(self.guard(key, token, held)),
            Attempt::Busy => {
                debug!("✓ Redis LOCK {} -> BUSY", self.keys.compose(key));
                Err(Error::NotLocked)
            }
        }
    }

    /// Retry `try_lock` until it succeeds or a backend error occurs.
    pub(crate) async fn lock(&self, key: &str) -> Result<LockGuard> {
        loop {
            match self.try_lock(key).await {
                Err(Error::NotLocked) => tokio::time::sleep(LOCK_RETRY_INTERVAL).await,
                other => return other,
            }
        }
    }

    async fn attempt(&self, key: &str, token: &str) -> Result<Attempt> {
        let started = Instant::now();
        let ttl_ms = millis(self.validity);
        let replica_keys = self.replica_keys(key);

        let results = join_all(replica_keys.iter().map(|replica| async move {
            let reply: Option<String> = self
                .conn
                .query(cmd("SET").arg(replica).arg(token).arg("NX").arg("PX").arg(ttl_ms))
                .await?;
            Ok::<bool, Error>(reply.is_some())
        }))
        .await;

        let mut held = Vec::new();
        let mut contended = false;
        let mut last_error = None;
        for (replica, result) in replica_keys.into_iter().zip(results) {
            match result {
                Ok(true) => held.push(replica),
                Ok(false) => contended = true,
                Err(e) => {
                    warn!("⚠ Redis LOCK replica {} failed: {}", replica, e);
                    last_error = Some(e);
                }
            }
        }

        if held.len() >= self.majority && started.elapsed() < self.validity {
            debug!(
                "✓ Redis LOCK {} ({}/{} replicas)",
                self.keys.compose(key),
                held.len(),
                self.replicas()
            );
            return Ok(Attempt::Acquired(held));
        }

        release_replicas(self.conn, &held, token).await;
        match last_error {
            Some(e) if !contended && held.is_empty() => Err(e),
            _ => Ok(Attempt::Busy),
        }
    }

    fn guard(&self, key: &str, token: String, held: Vec<String>) -> LockGuard {
        let (signal, context) = LockContext::channel();
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(renew(
            self.conn,
            self.keys.compose(key),
            token,
            held,
            self.majority,
            self.validity,
            signal,
            stopped,
        ));

        LockGuard::new(self.keys.compose(key), context, Unlock::Remote { stop, task })
    }
}

/// Keep the lease alive until stopped or lost, then release what we hold.
#[allow(clippy::too_many_arguments)]
async fn renew(
    conn: &'static SharedConnection,
    name: String,
    token: String,
    held: Vec<String>,
    majority: usize,
    validity: Duration,
    signal: watch::Sender<bool>,
    mut stopped: oneshot::Receiver<()>,
) {
    let ttl_ms = millis(validity);
    let period = (validity / 2).max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = &mut stopped => break,
            _ = ticker.tick() => {
                let results = join_all(held.iter().map(|replica| {
                    let token = token.as_str();
                    async move {
                        conn.query::<i64>(
                            cmd("EVAL").arg(EXTEND_SCRIPT).arg(1).arg(replica).arg(token).arg(ttl_ms),
                        )
                        .await
                    }
                }))
                .await;

                let extended = results.iter().filter(|r| matches!(r, Ok(1))).count();
                if extended < majority {
                    warn!(
                        "⚠ Redis LOCK {} lost: lease extended on {}/{} replicas",
                        name,
                        extended,
                        held.len()
                    );
                    break;
                }
                debug!("✓ Redis LOCK {} extended", name);
            }
        }
    }

    let _ = signal.send(true);
    release_replicas(conn, &held, &token).await;
    debug!("✓ Redis UNLOCK {}", name);
}

async fn release_replicas(conn: &SharedConnection, replicas: &[String], token: &str) {
    let results = join_all(replicas.iter().map(|replica| async move {
        conn.query::<i64>(cmd("EVAL").arg(RELEASE_SCRIPT).arg(1).arg(replica).arg(token))
            .await
    }))
    .await;

    for (replica, result) in replicas.iter().zip(results) {
        if let Err(e) = result {
            warn!("⚠ Redis UNLOCK replica {} failed: {}", replica, e);
        }
    }
}
