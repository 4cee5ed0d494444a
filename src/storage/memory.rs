use super::backend::ProfileBackend;
use crate::error::SyncResult;
use crate::profile::types::{OwnerId, ProfileRecord};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// In-process profile table.
///
/// Backs the hub and the tests. `DashMap::insert` replaces the row for a key
/// under its shard lock, which gives the single-statement upsert semantics.
#[derive(Default)]
pub struct MemoryProfileBackend {
    rows: Arc<DashMap<OwnerId, ProfileRecord>>,
}

impl MemoryProfileBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_local(&self, owner_id: &OwnerId) -> Option<ProfileRecord> {
        self.rows.get(owner_id).map(|row| row.value().clone())
    }

    pub fn store_local(&self, record: ProfileRecord) {
        self.rows.insert(record.owner_id.clone(), record);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait]
impl ProfileBackend for MemoryProfileBackend {
    async fn fetch(&self, owner_id: &OwnerId) -> SyncResult<Option<ProfileRecord>> {
        Ok(self.get_local(owner_id))
    }

    async fn upsert(&self, record: ProfileRecord) -> SyncResult<()> {
        tracing::debug!("Upserting profile row {}", record.owner_id);
        self.store_local(record);
        Ok(())
    }
}
