use crate::error::SyncResult;
use crate::profile::types::{OwnerId, ProfileRecord};

use async_trait::async_trait;

/// The persisted relation: one row per owner, keyed by `owner_id`.
///
/// Implementations map onto a concrete engine (in-process map, the hub over
/// HTTP, a SQL table). `upsert` must be a single insert-or-update so two
/// concurrent writers for the same owner never produce two rows.
#[async_trait]
pub trait ProfileBackend: Send + Sync {
    /// `Ok(None)` when no row exists. Absence is not an error.
    async fn fetch(&self, owner_id: &OwnerId) -> SyncResult<Option<ProfileRecord>>;

    /// Insert-or-update keyed by `record.owner_id`; last writer wins.
    async fn upsert(&self, record: ProfileRecord) -> SyncResult<()>;
}
