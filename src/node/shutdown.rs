//! Shutdown flush.
//!
//! Drains every active profile and persists each one concurrently, bounded by
//! a single overall deadline. Whatever has not finished by then is reported
//! lost and logged with a CRITICAL marker.

use super::disconnect::DisconnectHandler;
use super::runtime::NodeHandle;
use crate::error::{SyncError, SyncResult};
use crate::profile::types::OwnerId;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

#[derive(Debug, Default, Clone)]
pub struct ShutdownReport {
    pub flushed: Vec<OwnerId>,
    /// Save or encode failed before the deadline.
    pub failed: Vec<OwnerId>,
    /// Still in flight at the deadline.
    pub lost: Vec<OwnerId>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.lost.is_empty()
    }

    pub fn into_result(self) -> SyncResult<Self> {
        if self.lost.is_empty() {
            Ok(self)
        } else {
            Err(SyncError::ShutdownFlushTimeout {
                lost: self.lost.len(),
            })
        }
    }
}

pub async fn flush_all(
    node: &NodeHandle,
    disconnect: Arc<DisconnectHandler>,
    deadline: Duration,
) -> ShutdownReport {
    let mut report = ShutdownReport::default();
    let started = Instant::now();
    let deadline_at = started + deadline;

    let drained = match node.drain().await {
        Ok(drained) => drained,
        Err(e) => {
            tracing::error!("CRITICAL: could not drain node for shutdown flush: {}", e);
            return report;
        }
    };

    tracing::info!("Flushing {} profile(s), deadline {:?}", drained.len(), deadline);

    let mut pending: HashSet<OwnerId> = HashSet::new();
    let mut flushes = JoinSet::new();

    for (owner_id, snapshot) in drained {
        match snapshot {
            Ok(snapshot) => {
                pending.insert(owner_id.clone());
                let disconnect = disconnect.clone();
                flushes.spawn(async move {
                    let result = disconnect.persist(snapshot).await;
                    (owner_id, result)
                });
            }
            Err(e) => {
                tracing::error!("CRITICAL: profile {} could not be captured: {}", owner_id, e);
                report.failed.push(owner_id);
            }
        }
    }

    loop {
        match tokio::time::timeout_at(deadline_at, flushes.join_next()).await {
            Ok(Some(Ok((owner_id, Ok(_))))) => {
                pending.remove(&owner_id);
                report.flushed.push(owner_id);
            }
            Ok(Some(Ok((owner_id, Err(e))))) => {
                tracing::error!("CRITICAL: profile {} failed to flush: {}", owner_id, e);
                pending.remove(&owner_id);
                report.failed.push(owner_id);
            }
            Ok(Some(Err(e))) => {
                tracing::error!("Flush task aborted: {}", e);
            }
            Ok(None) => break,
            Err(_) => {
                tracing::error!(
                    "Shutdown deadline of {:?} reached with {} save(s) in flight",
                    deadline,
                    pending.len()
                );
                break;
            }
        }
    }

    flushes.abort_all();

    for owner_id in pending {
        tracing::error!(
            "CRITICAL: profile {} not flushed before shutdown, changes since its last save are lost",
            owner_id
        );
        report.lost.push(owner_id);
    }

    tracing::info!(
        "Shutdown flush finished in {:?}: {} flushed, {} failed, {} lost",
        started.elapsed(),
        report.flushed.len(),
        report.failed.len(),
        report.lost.len()
    );

    report
}
