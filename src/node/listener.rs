//! Save-request listener.
//!
//! Answers `midgard:sync:req_save` for owners active on this node: capture a
//! snapshot, save it, announce `midgard:sync:saved`. The session stays where
//! it is. Requests for owners not on this node are ignored.

use super::runtime::NodeHandle;
use crate::context::SyncContext;
use crate::coordination::channel::{TOPIC_SAVE_COMPLETED, TOPIC_SAVE_REQUESTED};
use crate::error::SyncResult;
use crate::profile::types::OwnerId;

use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct SaveRequestListener {
    ctx: Arc<SyncContext>,
    node: NodeHandle,
}

impl SaveRequestListener {
    pub fn new(ctx: Arc<SyncContext>, node: NodeHandle) -> Arc<Self> {
        Arc::new(Self { ctx, node })
    }

    /// Subscribes and spawns the listening loop.
    pub async fn start(self: Arc<Self>) -> SyncResult<JoinHandle<()>> {
        let mut requests = self.ctx.channel.subscribe(TOPIC_SAVE_REQUESTED).await?;
        tracing::info!("Listening for save requests on {}", TOPIC_SAVE_REQUESTED);

        Ok(tokio::spawn(async move {
            while let Some(message) = requests.recv().await {
                let owner_id = OwnerId::new(message.payload);
                let listener = self.clone();
                // Each save runs on its own task so one slow save does not
                // hold up requests for other owners.
                tokio::spawn(async move {
                    if let Err(e) = listener.handle_request(&owner_id).await {
                        tracing::warn!("Save request for {} failed: {}", owner_id, e);
                    }
                });
            }
            tracing::debug!("Save request subscription closed");
        }))
    }

    /// Returns whether this node held the owner and saved it.
    pub async fn handle_request(&self, owner_id: &OwnerId) -> SyncResult<bool> {
        let snapshot = match self.node.capture(owner_id).await? {
            Some(snapshot) => snapshot,
            None => {
                tracing::trace!("Save request for {} not on this node", owner_id);
                return Ok(false);
            }
        };

        self.ctx.store.save(snapshot).await?;
        self.ctx
            .channel
            .publish(TOPIC_SAVE_COMPLETED, owner_id.as_str())
            .await?;

        tracing::info!("Saved {} on request", owner_id);
        Ok(true)
    }
}
