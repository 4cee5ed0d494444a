//! Profile Store
//!
//! Async load/save of profiles on top of a `ProfileBackend`.
//!
//! ## Responsibilities
//! - **Worker pool**: every backend call runs in its own spawned task, gated by a
//!   semaphore, so neither the caller nor the node's mutation task ever blocks on I/O.
//! - **Read retry**: loads are retried with jittered exponential backoff; saves are
//!   attempted once and the caller decides what to do with a failure.
//! - **First load**: a missing row yields a fresh profile, never an error.

use super::backend::ProfileBackend;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::profile::codec::ProfileCodec;
use crate::profile::types::{now_ms, OwnerId, Profile, ProfileRecord, SaveAck};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub struct ProfileStore {
    backend: Arc<dyn ProfileBackend>,
    codec: Arc<ProfileCodec>,
    /// Bounds the number of in-flight backend calls.
    workers: Arc<Semaphore>,
    read_attempts: usize,
    retry_delay: Duration,
}

impl ProfileStore {
    pub fn new(
        backend: Arc<dyn ProfileBackend>,
        codec: Arc<ProfileCodec>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            backend,
            codec,
            workers: Arc::new(Semaphore::new(config.store_workers.max(1))),
            read_attempts: config.store_read_attempts.max(1),
            retry_delay: config.store_retry_delay,
        }
    }

    pub fn codec(&self) -> &Arc<ProfileCodec> {
        &self.codec
    }

    /// Loads the stored profile, or a fresh empty one named `default_name`.
    ///
    /// # Errors
    /// * `TransientIo` once every read attempt failed.
    /// * `Decode` if the stored root document is malformed.
    pub async fn load(&self, owner_id: &OwnerId, default_name: &str) -> SyncResult<Profile> {
        match self.fetch_with_retry(owner_id).await? {
            Some(record) => {
                tracing::debug!("Loaded stored profile {}", owner_id);
                self.codec.restore(record)
            }
            None => {
                tracing::info!(
                    "No stored profile for {}, creating '{}'",
                    owner_id,
                    default_name
                );
                Ok(Profile::new(owner_id.clone(), default_name))
            }
        }
    }

    /// Persists a captured snapshot with a single upsert.
    pub async fn save(&self, record: ProfileRecord) -> SyncResult<SaveAck> {
        let owner_id = record.owner_id.clone();

        self.on_worker("save", move |backend| async move {
            backend.upsert(record).await
        })
        .await?;

        tracing::debug!("Saved profile {}", owner_id);

        Ok(SaveAck {
            owner_id,
            saved_at_ms: now_ms(),
        })
    }

    async fn fetch_with_retry(&self, owner_id: &OwnerId) -> SyncResult<Option<ProfileRecord>> {
        let mut delay_ms = self.retry_delay.as_millis() as u64;

        for attempt in 0..self.read_attempts {
            let owner = owner_id.clone();
            let result = self
                .on_worker("load", move |backend| async move {
                    backend.fetch(&owner).await
                })
                .await;

            match result {
                Ok(record) => return Ok(record),
                Err(e) if e.is_transient() && attempt + 1 < self.read_attempts => {
                    tracing::warn!(
                        "Load of {} failed (attempt {}/{}): {}",
                        owner_id,
                        attempt + 1,
                        self.read_attempts,
                        e
                    );
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
                Err(e) => return Err(e),
            }
        }

        Err(SyncError::transient("load", "retry attempts exhausted"))
    }

    /// Runs a backend call on a pooled worker task.
    async fn on_worker<T, F, Fut>(&self, operation: &'static str, job: F) -> SyncResult<T>
    where
        F: FnOnce(Arc<dyn ProfileBackend>) -> Fut,
        Fut: Future<Output = SyncResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| SyncError::transient(operation, e))?;

        let job = job(self.backend.clone());
        let handle = tokio::spawn(async move {
            let _permit = permit;
            job.await
        });

        handle
            .await
            .map_err(|e| SyncError::transient(operation, e))?
    }
}
