//! Node Runtime
//!
//! The node's single mutation task. It owns the `ProfileCache` outright and is
//! driven by commands over a channel, so a `Profile` is only ever touched from
//! this one task. Everything that leaves the task is a `ProfileRecord`
//! snapshot encoded here.

use crate::error::{SyncError, SyncResult};
use crate::profile::cache::ProfileCache;
use crate::profile::codec::ProfileCodec;
use crate::profile::types::{OwnerId, Profile, ProfileRecord};

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

const COMMAND_BUFFER: usize = 256;

type ProfileJob = Box<dyn FnOnce(Option<&mut Profile>) + Send>;

/// Commands accepted by the runtime.
pub enum NodeCommand {
    /// Makes `profile` the active copy. Replies `false` if one was already active.
    Install {
        profile: Profile,
        resp: oneshot::Sender<bool>,
    },
    /// Runs `job` against the active profile (or `None`).
    With { owner_id: OwnerId, job: ProfileJob },
    /// Snapshot without ending the session.
    Capture {
        owner_id: OwnerId,
        resp: oneshot::Sender<SyncResult<Option<ProfileRecord>>>,
    },
    /// Removes the profile and returns its final snapshot.
    Detach {
        owner_id: OwnerId,
        resp: oneshot::Sender<SyncResult<Option<ProfileRecord>>>,
    },
    /// Removes every profile, snapshotting each.
    Drain {
        resp: oneshot::Sender<Vec<(OwnerId, SyncResult<ProfileRecord>)>>,
    },
    Contains {
        owner_id: OwnerId,
        resp: oneshot::Sender<bool>,
    },
    ActiveOwners {
        resp: oneshot::Sender<Vec<OwnerId>>,
    },
    Shutdown,
}

pub struct NodeRuntime {
    cache: ProfileCache,
    codec: Arc<ProfileCodec>,
    rx: mpsc::Receiver<NodeCommand>,
}

impl NodeRuntime {
    /// Starts the mutation task and returns a handle to it.
    pub fn spawn(codec: Arc<ProfileCodec>) -> (NodeHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let runtime = NodeRuntime {
            cache: ProfileCache::new(),
            codec,
            rx,
        };
        let handle = tokio::spawn(runtime.run());
        (NodeHandle { tx }, handle)
    }

    async fn run(mut self) {
        tracing::debug!("Node runtime started");

        while let Some(command) = self.rx.recv().await {
            match command {
                NodeCommand::Install { profile, resp } => {
                    let owner_id = profile.owner_id().clone();
                    let fresh = if self.cache.contains(&owner_id) {
                        tracing::warn!("Profile {} already active, keeping existing copy", owner_id);
                        false
                    } else {
                        self.cache.put(profile);
                        tracing::info!("Profile {} active ({} on node)", owner_id, self.cache.len());
                        true
                    };
                    let _ = resp.send(fresh);
                }
                NodeCommand::With { owner_id, job } => {
                    job(self.cache.get_mut(&owner_id));
                }
                NodeCommand::Capture { owner_id, resp } => {
                    let snapshot = self
                        .cache
                        .get(&owner_id)
                        .map(|profile| self.codec.snapshot(profile))
                        .transpose();
                    let _ = resp.send(snapshot);
                }
                NodeCommand::Detach { owner_id, resp } => {
                    let snapshot = match self.cache.remove(&owner_id) {
                        Some(profile) => {
                            tracing::info!("Profile {} detached ({} on node)", owner_id, self.cache.len());
                            self.codec.snapshot(&profile).map(Some)
                        }
                        None => Ok(None),
                    };
                    if let Err(e) = &snapshot {
                        tracing::error!("Profile {} removed but could not be captured: {}", owner_id, e);
                    }
                    let _ = resp.send(snapshot);
                }
                NodeCommand::Drain { resp } => {
                    let drained = self
                        .cache
                        .drain()
                        .into_iter()
                        .map(|profile| (profile.owner_id().clone(), self.codec.snapshot(&profile)))
                        .collect();
                    let _ = resp.send(drained);
                }
                NodeCommand::Contains { owner_id, resp } => {
                    let _ = resp.send(self.cache.contains(&owner_id));
                }
                NodeCommand::ActiveOwners { resp } => {
                    let _ = resp.send(self.cache.owners().cloned().collect());
                }
                NodeCommand::Shutdown => break,
            }
        }

        if !self.cache.is_empty() {
            tracing::warn!("Node runtime stopped with {} active profile(s)", self.cache.len());
        }
        tracing::debug!("Node runtime stopped");
    }
}

/// Cloneable handle to the node's mutation task.
#[derive(Clone)]
pub struct NodeHandle {
    tx: mpsc::Sender<NodeCommand>,
}

impl NodeHandle {
    async fn send(&self, command: NodeCommand) -> SyncResult<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SyncError::NodeStopped)
    }

    pub async fn install(&self, profile: Profile) -> SyncResult<bool> {
        let (resp, rx) = oneshot::channel();
        self.send(NodeCommand::Install { profile, resp }).await?;
        rx.await.map_err(|_| SyncError::NodeStopped)
    }

    /// Runs `f` on the mutation task against the active profile.
    ///
    /// # Errors
    /// `NotActive` if the owner has no session on this node.
    pub async fn with_profile<R, F>(&self, owner_id: &OwnerId, f: F) -> SyncResult<R>
    where
        F: FnOnce(&mut Profile) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (resp, rx) = oneshot::channel();
        let job: ProfileJob = Box::new(move |profile| {
            let _ = resp.send(profile.map(f));
        });
        self.send(NodeCommand::With {
            owner_id: owner_id.clone(),
            job,
        })
        .await?;

        rx.await
            .map_err(|_| SyncError::NodeStopped)?
            .ok_or_else(|| SyncError::NotActive(owner_id.clone()))
    }

    pub async fn capture(&self, owner_id: &OwnerId) -> SyncResult<Option<ProfileRecord>> {
        let (resp, rx) = oneshot::channel();
        self.send(NodeCommand::Capture {
            owner_id: owner_id.clone(),
            resp,
        })
        .await?;
        rx.await.map_err(|_| SyncError::NodeStopped)?
    }

    pub async fn detach(&self, owner_id: &OwnerId) -> SyncResult<Option<ProfileRecord>> {
        let (resp, rx) = oneshot::channel();
        self.send(NodeCommand::Detach {
            owner_id: owner_id.clone(),
            resp,
        })
        .await?;
        rx.await.map_err(|_| SyncError::NodeStopped)?
    }

    pub async fn drain(&self) -> SyncResult<Vec<(OwnerId, SyncResult<ProfileRecord>)>> {
        let (resp, rx) = oneshot::channel();
        self.send(NodeCommand::Drain { resp }).await?;
        rx.await.map_err(|_| SyncError::NodeStopped)
    }

    pub async fn is_active(&self, owner_id: &OwnerId) -> SyncResult<bool> {
        let (resp, rx) = oneshot::channel();
        self.send(NodeCommand::Contains {
            owner_id: owner_id.clone(),
            resp,
        })
        .await?;
        rx.await.map_err(|_| SyncError::NodeStopped)
    }

    pub async fn active_owners(&self) -> SyncResult<Vec<OwnerId>> {
        let (resp, rx) = oneshot::channel();
        self.send(NodeCommand::ActiveOwners { resp }).await?;
        rx.await.map_err(|_| SyncError::NodeStopped)
    }

    pub async fn stop(&self) {
        let _ = self.tx.send(NodeCommand::Shutdown).await;
    }
}
