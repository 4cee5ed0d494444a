//! Disconnect Handler
//!
//! Ends a session: detaches the profile from the node, then persists the
//! final snapshot under the profile lock and announces completion.

use super::runtime::NodeHandle;
use crate::context::SyncContext;
use crate::coordination::channel::{
    LOCAL_SAVED_PAYLOAD, TOPIC_SAVE_COMPLETED, local_saved_topic,
};
use crate::coordination::lock::profile_lock_key;
use crate::error::{SyncError, SyncResult};
use crate::profile::types::{OwnerId, ProfileRecord, SaveAck};

use std::sync::Arc;

pub struct DisconnectHandler {
    ctx: Arc<SyncContext>,
    node: NodeHandle,
}

impl DisconnectHandler {
    pub fn new(ctx: Arc<SyncContext>, node: NodeHandle) -> Self {
        Self { ctx, node }
    }

    /// Detaches and persists `owner_id`'s profile.
    ///
    /// Returns `Ok(None)` if the owner had no session here. Once this returns
    /// the profile is gone from the node whether or not the save succeeded.
    ///
    /// After the detach the save runs on its own task, so dropping this
    /// future does not drop the snapshot.
    pub async fn on_disconnect(
        self: &Arc<Self>,
        owner_id: &OwnerId,
    ) -> SyncResult<Option<SaveAck>> {
        let snapshot = match self.node.detach(owner_id).await? {
            Some(snapshot) => snapshot,
            None => {
                tracing::debug!("Disconnect for {} with no active profile", owner_id);
                return Ok(None);
            }
        };

        let handler = self.clone();
        let save = tokio::spawn(async move { handler.persist(snapshot).await });

        match save.await {
            Ok(result) => result.map(Some),
            Err(e) => {
                tracing::error!("Save task for {} did not finish: {}", owner_id, e);
                Err(SyncError::transient("disconnect save", e))
            }
        }
    }

    /// Lock, save, announce, release.
    ///
    /// If the lock is already held the save still goes ahead, but the lock
    /// is left for its owner and `sync:saved:<owner>` is not sent: waiters
    /// must keep waiting for that owner. On failure the lock is left to
    /// expire so a joining node keeps waiting for the TTL.
    pub async fn persist(&self, snapshot: ProfileRecord) -> SyncResult<SaveAck> {
        let owner_id = snapshot.owner_id.clone();
        let key = profile_lock_key(&owner_id);

        let locked = match self.ctx.coordination.acquire(&key, self.ctx.config.lock_ttl).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!("Lock {} already held, saving {} without it", key, owner_id);
                false
            }
            Err(e) => {
                tracing::warn!("Could not take lock {}, saving {} without it: {}", key, owner_id, e);
                false
            }
        };

        let ack = match self.ctx.store.save(snapshot).await {
            Ok(ack) => ack,
            Err(e) => {
                tracing::error!(
                    "Failed to save profile {}: {} (lock left to expire)",
                    owner_id,
                    e
                );
                return Err(e);
            }
        };

        if let Err(e) = self
            .ctx
            .channel
            .publish(TOPIC_SAVE_COMPLETED, owner_id.as_str())
            .await
        {
            tracing::warn!("Failed to announce save of {}: {}", owner_id, e);
        }
        if locked {
            if let Err(e) = self
                .ctx
                .channel
                .publish(&local_saved_topic(&owner_id), LOCAL_SAVED_PAYLOAD)
                .await
            {
                tracing::warn!("Failed to announce save of {} locally: {}", owner_id, e);
            }

            if let Err(e) = self.ctx.coordination.release(&key).await {
                tracing::warn!("Failed to release {} (expires with TTL): {}", key, e);
            }
        }

        tracing::info!("Profile {} saved on {}", owner_id, self.ctx.node_id);
        Ok(ack)
    }
}
