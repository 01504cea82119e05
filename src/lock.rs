//! Lock handles shared by both engines.
//!
//! Acquiring a lock yields a [`LockGuard`]. The guard owns the lock: calling
//! [`LockGuard::release`] (or dropping it) gives it back. Each guard carries a
//! [`LockContext`] that is cancelled once the lock is no longer held, either
//! because it was released or because the remote lease could not be renewed.
//! Long critical sections must watch the context:
//!
//! ```ignore
//! let guard = cache.lock("job:123:lock").await?;
//! let ctx = guard.context();
//!
//! tokio::select! {
//!     _ = ctx.cancelled() => return Err("lock lost during processing".into()),
//!     result = process_job("job:123") => result?,
//! }
//!
//! guard.release().await;
//! ```

use tokio::sync::watch;

#[cfg(feature = "inmemory")]
use crate::error::{Error, Result};
#[cfg(feature = "inmemory")]
use dashmap::{mapref::entry::Entry, DashMap};
#[cfg(feature = "inmemory")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "inmemory")]
use std::sync::Arc;
#[cfg(feature = "inmemory")]
use std::time::{Duration, Instant};

/// Signal that a lock is no longer held.
#[derive(Clone, Debug)]
pub struct LockContext {
    rx: watch::Receiver<bool>,
}

impl LockContext {
    pub(crate) fn channel() -> (watch::Sender<bool>, LockContext) {
        let (tx, rx) = watch::channel(false);
        (tx, LockContext { rx })
    }

    /// True once the lock was released or its lease lost.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait until the lock is released or its lease lost.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            // Owner gone without signalling: nothing can hold the lock anymore.
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// How a guard gives its lock back.
pub(crate) enum Unlock {
    #[cfg(feature = "inmemory")]
    Local {
        table: Arc<LockTable>,
        token: u64,
    },
    #[cfg(feature = "redis")]
    Remote {
        stop: tokio::sync::oneshot::Sender<()>,
        task: tokio::task::JoinHandle<()>,
    },
}

/// A held lock. Released explicitly with [`release`](Self::release) or on drop.
pub struct LockGuard {
    key: String,
    context: LockContext,
    unlock: Option<Unlock>,
}

impl LockGuard {
    pub(crate) fn new(key: String, context: LockContext, unlock: Unlock) -> Self {
        LockGuard {
            key,
            context,
            unlock: Some(unlock),
        }
    }

    /// Composite key this lock protects.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Context cancelled when the lock stops being held.
    pub fn context(&self) -> LockContext {
        self.context.clone()
    }

    /// True if the lease was lost while the guard is still alive.
    pub fn is_lost(&self) -> bool {
        self.context.is_cancelled()
    }

    /// Release the lock and wait until the backend has let go of it.
    ///
    /// After this returns, another caller's `try_lock` on the same key succeeds.
    pub async fn release(mut self) {
        match self.unlock.take() {
            #[cfg(feature = "inmemory")]
            Some(Unlock::Local { table, token }) => table.release(&self.key, token),
            #[cfg(feature = "redis")]
            Some(Unlock::Remote { stop, task }) => {
                let _ = stop.send(());
                if let Err(e) = task.await {
                    warn!("⚠ Lock release task for {} failed: {}", self.key, e);
                }
            }
            None => {}
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match self.unlock.take() {
            #[cfg(feature = "inmemory")]
            Some(Unlock::Local { table, token }) => table.release(&self.key, token),
            // The renewal task sees the closed channel and releases in the background.
            #[cfg(feature = "redis")]
            Some(Unlock::Remote { stop, .. }) => {
                let _ = stop.send(());
            }
            None => {}
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("lost", &self.is_lost())
            .finish()
    }
}

#[cfg(feature = "inmemory")]
struct Holder {
    token: u64,
    expires_at: Instant,
    signal: watch::Sender<bool>,
}

/// In-process lock table: presence check plus a deadline per key.
///
/// Only excludes callers inside this process.
#[cfg(feature = "inmemory")]
pub(crate) struct LockTable {
    holders: DashMap<String, Holder>,
    next_token: AtomicU64,
}

#[cfg(feature = "inmemory")]
impl LockTable {
    pub(crate) fn new() -> Self {
        LockTable {
            holders: DashMap::new(),
            next_token: AtomicU64::new(1),
        }
    }

    /// Take the lock if it is free or its previous holder's deadline passed.
    pub(crate) fn try_acquire(self: &Arc<Self>, key: &str, validity: Duration) -> Result<LockGuard> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (signal, context) = LockContext::channel();
        let holder = Holder {
            token,
            expires_at: Instant::now() + validity,
            signal,
        };

        match self.holders.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at > Instant::now() {
                    debug!("✓ Local LOCK {} -> BUSY", key);
                    return Err(Error::NotLocked);
                }
                let expired = occupied.insert(holder);
                let _ = expired.signal.send(true);
                debug!("✓ Local LOCK {} -> TAKEN OVER (expired holder)", key);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(holder);
                debug!("✓ Local LOCK {}", key);
            }
        }

        Ok(LockGuard::new(
            key.to_string(),
            context,
            Unlock::Local {
                table: Arc::clone(self),
                token,
            },
        ))
    }

    fn release(&self, key: &str, token: u64) {
        if let Some((_, holder)) = self.holders.remove_if(key, |_, h| h.token == token) {
            let _ = holder.signal.send(true);
            debug!("✓ Local UNLOCK {}", key);
        }
    }

    /// Drop every lock, cancelling their contexts.
    pub(crate) fn clear(&self) {
        for holder in self.holders.iter() {
            let _ = holder.signal.send(true);
        }
        self.holders.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.holders.len()
    }
}
