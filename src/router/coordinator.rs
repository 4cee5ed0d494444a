//! Switch Coordinator
//!
//! Before a session moves to another node, ask the current node to flush the
//! profile and wait a bounded time for the acknowledgement.
//!
//! ```text
//! IDLE --publish req_save--> AWAITING_SAVE_ACK --saved(owner)--> CONFIRMED
//!                                   |
//!                                   +--timeout--> TIMED_OUT
//! ```
//!
//! Waiters are keyed by owner id. Concurrent switches of the same owner share
//! one acknowledgement: the first matching `midgard:sync:saved` resolves all of
//! them.

use crate::config::{SyncConfig, TimeoutPolicy};
use crate::coordination::channel::{SyncChannel, TOPIC_SAVE_COMPLETED, TOPIC_SAVE_REQUESTED};
use crate::error::{SyncError, SyncResult};
use crate::profile::types::OwnerId;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Confirmed,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct SwitchReport {
    pub owner_id: OwnerId,
    pub target: String,
    pub outcome: SaveOutcome,
    pub waited: Duration,
}

/// Moves a session to its target node once the save step is done.
#[async_trait]
pub trait SessionTransfer: Send + Sync {
    async fn transfer(&self, owner_id: &OwnerId, target: &str) -> SyncResult<()>;
}

pub struct SwitchCoordinator {
    channel: Arc<dyn SyncChannel>,
    transfer: Arc<dyn SessionTransfer>,
    pending: DashMap<OwnerId, Vec<oneshot::Sender<()>>>,
    save_ack_timeout: Duration,
    policy: TimeoutPolicy,
}

impl SwitchCoordinator {
    pub fn new(
        channel: Arc<dyn SyncChannel>,
        transfer: Arc<dyn SessionTransfer>,
        config: &SyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel,
            transfer,
            pending: DashMap::new(),
            save_ack_timeout: config.save_ack_timeout,
            policy: config.timeout_policy,
        })
    }

    /// Subscribes to save acknowledgements and spawns the resolving loop.
    pub async fn start(self: &Arc<Self>) -> SyncResult<JoinHandle<()>> {
        let mut acks = self.channel.subscribe(TOPIC_SAVE_COMPLETED).await?;
        let coordinator = self.clone();

        tracing::info!(
            "Switch coordinator listening on {} (timeout {:?}, {:?})",
            TOPIC_SAVE_COMPLETED,
            self.save_ack_timeout,
            self.policy
        );

        Ok(tokio::spawn(async move {
            while let Some(message) = acks.recv().await {
                coordinator.resolve(&OwnerId::new(message.payload));
            }
            tracing::debug!("Save acknowledgement subscription closed");
        }))
    }

    /// Wakes every waiter for `owner_id`. Returns how many were woken.
    pub fn resolve(&self, owner_id: &OwnerId) -> usize {
        match self.pending.remove(owner_id) {
            Some((_, waiters)) => {
                let count = waiters.len();
                for waiter in waiters {
                    let _ = waiter.send(());
                }
                tracing::debug!("Save of {} confirmed ({} waiter(s))", owner_id, count);
                count
            }
            None => {
                tracing::trace!("Save acknowledgement for {} with no waiter", owner_id);
                0
            }
        }
    }

    /// Owners with at least one waiter.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Asks the owning node to flush `owner_id` and waits for the
    /// acknowledgement, at most `save_ack_timeout`.
    pub async fn request_save(&self, owner_id: &OwnerId) -> SaveOutcome {
        let (tx, rx) = oneshot::channel();

        // Registered before publishing so a fast acknowledgement is not lost.
        self.pending.entry(owner_id.clone()).or_default().push(tx);

        if let Err(e) = self
            .channel
            .publish(TOPIC_SAVE_REQUESTED, owner_id.as_str())
            .await
        {
            tracing::warn!("Failed to request save of {}: {}", owner_id, e);
        }

        let result = tokio::time::timeout(self.save_ack_timeout, rx).await;
        match result {
            Ok(Ok(())) => SaveOutcome::Confirmed,
            _ => {
                self.drop_closed_waiters(owner_id);
                SaveOutcome::TimedOut
            }
        }
    }

    /// Save step, timeout policy, then transfer.
    ///
    /// # Errors
    /// * `SaveTimeout` under `FailClosed` when no acknowledgement arrived.
    /// * Whatever the `SessionTransfer` returns.
    pub async fn switch(&self, owner_id: &OwnerId, target: &str) -> SyncResult<SwitchReport> {
        let started = Instant::now();
        let outcome = self.request_save(owner_id).await;
        let waited = started.elapsed();

        match (outcome, self.policy) {
            (SaveOutcome::Confirmed, _) => {
                tracing::info!("Save of {} confirmed in {:?}", owner_id, waited);
            }
            (SaveOutcome::TimedOut, TimeoutPolicy::FailOpen) => {
                tracing::warn!(
                    "No save acknowledgement for {} after {:?}, switching anyway",
                    owner_id,
                    waited
                );
            }
            (SaveOutcome::TimedOut, TimeoutPolicy::FailClosed) => {
                tracing::warn!(
                    "No save acknowledgement for {} after {:?}, refusing switch",
                    owner_id,
                    waited
                );
                return Err(SyncError::SaveTimeout {
                    owner_id: owner_id.clone(),
                    timeout_ms: self.save_ack_timeout.as_millis() as u64,
                });
            }
        }

        self.transfer.transfer(owner_id, target).await?;
        tracing::info!("Switched {} to {}", owner_id, target);

        Ok(SwitchReport {
            owner_id: owner_id.clone(),
            target: target.to_string(),
            outcome,
            waited,
        })
    }

    fn drop_closed_waiters(&self, owner_id: &OwnerId) {
        if let Entry::Occupied(mut entry) = self.pending.entry(owner_id.clone()) {
            entry.get_mut().retain(|waiter| !waiter.is_closed());
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }
}
