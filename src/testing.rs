//! Fault-injecting wrappers shared by the unit tests.

use crate::coordination::lock::CoordinationStore;
use crate::error::{SyncError, SyncResult};
use crate::profile::types::{OwnerId, ProfileModule, ProfileRecord};
use crate::storage::backend::ProfileBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Module used across tests: a single opaque value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub value: i64,
}

impl ProfileModule for Counter {
    const TAG: &'static str = "counter";
}

/// Fails the first `failures` fetches and every upsert while `fail_saves` is set.
pub struct FlakyBackend {
    pub inner: Arc<dyn ProfileBackend>,
    pub failures: AtomicUsize,
    pub fail_saves: AtomicBool,
    pub fetch_calls: AtomicUsize,
    pub upsert_calls: AtomicUsize,
}

impl FlakyBackend {
    pub fn new(inner: Arc<dyn ProfileBackend>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            fail_saves: AtomicBool::new(false),
            fetch_calls: AtomicUsize::new(0),
            upsert_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProfileBackend for FlakyBackend {
    async fn fetch(&self, owner_id: &OwnerId) -> SyncResult<Option<ProfileRecord>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SyncError::transient("fetch", "injected failure"));
        }
        self.inner.fetch(owner_id).await
    }

    async fn upsert(&self, record: ProfileRecord) -> SyncResult<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(SyncError::transient("upsert", "injected failure"));
        }
        self.inner.upsert(record).await
    }
}

/// Counts lock checks so tests can assert on the retry schedule.
pub struct CountingCoordination {
    pub inner: Arc<dyn CoordinationStore>,
    pub exists_calls: AtomicUsize,
}

impl CountingCoordination {
    pub fn new(inner: Arc<dyn CoordinationStore>) -> Self {
        Self {
            inner,
            exists_calls: AtomicUsize::new(0),
        }
    }

    pub fn checks(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoordinationStore for CountingCoordination {
    async fn acquire(&self, key: &str, ttl: Duration) -> SyncResult<bool> {
        self.inner.acquire(key, ttl).await
    }

    async fn release(&self, key: &str) -> SyncResult<()> {
        self.inner.release(key).await
    }

    async fn exists(&self, key: &str) -> SyncResult<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.exists(key).await
    }
}

/// Delays every upsert by `delay` on the runtime clock.
pub struct SlowBackend {
    pub inner: Arc<dyn ProfileBackend>,
    pub delay: Duration,
}

#[async_trait]
impl ProfileBackend for SlowBackend {
    async fn fetch(&self, owner_id: &OwnerId) -> SyncResult<Option<ProfileRecord>> {
        self.inner.fetch(owner_id).await
    }

    async fn upsert(&self, record: ProfileRecord) -> SyncResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.upsert(record).await
    }
}

/// Delays every lock acquisition by `delay` on the runtime clock.
pub struct SlowCoordination {
    pub inner: Arc<dyn CoordinationStore>,
    pub delay: Duration,
}

#[async_trait]
impl CoordinationStore for SlowCoordination {
    async fn acquire(&self, key: &str, ttl: Duration) -> SyncResult<bool> {
        tokio::time::sleep(self.delay).await;
        self.inner.acquire(key, ttl).await
    }

    async fn release(&self, key: &str) -> SyncResult<()> {
        self.inner.release(key).await
    }

    async fn exists(&self, key: &str) -> SyncResult<bool> {
        self.inner.exists(key).await
    }
}
