//! Advisory TTL Locks
//!
//! A lock is a key that exists until it is released or its TTL runs out,
//! whichever comes first. Expiry bounds how long a crashed holder can block
//! others; it does not make the lock a consensus primitive. A holder that
//! outlives its TTL (pause, partition) can overlap with the next holder.

use crate::error::SyncResult;
use crate::profile::types::OwnerId;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Value stored under every lock key.
pub const LOCK_MARKER: &str = "1";

/// Sweeper period for expired keys.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// `lock:profile:<owner_id>`
pub fn profile_lock_key(owner_id: &OwnerId) -> String {
    format!("lock:profile:{}", owner_id)
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Sets `key` only if it is absent (or expired), with expiry `ttl`.
    ///
    /// Returns whether this call took the lock.
    async fn acquire(&self, key: &str, ttl: Duration) -> SyncResult<bool>;

    /// Deletes `key` if present.
    async fn release(&self, key: &str) -> SyncResult<()>;

    /// Whether `key` is currently held.
    async fn exists(&self, key: &str) -> SyncResult<bool>;
}

#[derive(Debug, Clone)]
struct LockEntry {
    value: String,
    expires_at: Instant,
}

impl LockEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process lock table with lazy and periodic expiry.
///
/// Uses `tokio::time::Instant` so expiry follows the runtime clock.
#[derive(Default)]
pub struct MemoryCoordinationStore {
    locks: Arc<DashMap<String, LockEntry>>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-expired lock count.
    pub fn held_count(&self) -> usize {
        let now = Instant::now();
        self.locks
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }

    pub fn value_of(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.locks
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
    }

    /// Removes every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.locks.len();
        self.locks.retain(|_, entry| !entry.is_expired(now));
        before - self.locks.len()
    }

    /// Spawns the background sweeper.
    pub fn start_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::debug!("Expired {} lock(s)", purged);
                }
            }
        })
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> SyncResult<bool> {
        let now = Instant::now();
        let fresh = LockEntry {
            value: LOCK_MARKER.to_string(),
            expires_at: now + ttl,
        };

        // The entry guard holds the shard lock, making check-and-set atomic.
        let acquired = match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    tracing::debug!("Lock {} expired, taking it over", key);
                    occupied.insert(fresh);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        };

        tracing::trace!("acquire {} (ttl {:?}) -> {}", key, ttl, acquired);
        Ok(acquired)
    }

    async fn release(&self, key: &str) -> SyncResult<()> {
        if self.locks.remove(key).is_some() {
            tracing::trace!("Released lock {}", key);
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> SyncResult<bool> {
        let now = Instant::now();
        let held = match self.locks.get(key) {
            Some(entry) => !entry.is_expired(now),
            None => return Ok(false),
        };
        if !held {
            self.locks.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(held)
    }
}
