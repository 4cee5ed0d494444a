//! Admission Gate
//!
//! Decides whether a joining session may load its profile on this node.
//!
//! ```text
//! CHECKING_LOCK --absent--> ALLOWED --> LOADING --> ACTIVE
//!       |  ^
//!  held |  | interval elapsed
//!       v  |
//!    RETRY_WAIT --sync:saved:<owner>--> ALLOWED
//!       |
//!       +-- N-th check still held --> REJECTED
//! ```
//!
//! The lock check always precedes the load: a node never reads a profile
//! while another node may still be writing it.

use super::runtime::NodeHandle;
use crate::context::SyncContext;
use crate::coordination::channel::{Subscription, local_saved_topic};
use crate::coordination::lock::profile_lock_key;
use crate::error::{SyncError, SyncResult};
use crate::profile::types::{OwnerId, Profile};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionState {
    CheckingLock,
    RetryWait,
    Allowed,
    Loading,
    Active,
    Rejected,
}

/// How the profile became active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSource {
    /// Session was already active on this node.
    Cached,
    /// Loaded from the store, or created if no row existed.
    Stored,
    /// Store unreachable; an empty profile was synthesized.
    Synthesized,
}

#[derive(Debug, Clone)]
pub struct Admission {
    pub owner_id: OwnerId,
    pub source: ProfileSource,
    pub lock_checks: usize,
    /// Woken early by a save acknowledgement.
    pub woke_on_save: bool,
}

enum Wake {
    Timer,
    Saved,
    Closed,
}

pub struct AdmissionGate {
    ctx: Arc<SyncContext>,
    node: NodeHandle,
}

impl AdmissionGate {
    pub fn new(ctx: Arc<SyncContext>, node: NodeHandle) -> Self {
        Self { ctx, node }
    }

    /// Runs the admission state machine for a joining session.
    ///
    /// # Errors
    /// * `LockTimeout` when the lock is still held after every check.
    /// * `Decode` when the stored profile is malformed.
    /// * `NodeStopped` when the node runtime is gone.
    pub async fn admit(&self, owner_id: &OwnerId, default_name: &str) -> SyncResult<Admission> {
        if self.node.is_active(owner_id).await? {
            tracing::debug!("Profile {} already active, admitting from cache", owner_id);
            return Ok(Admission {
                owner_id: owner_id.clone(),
                source: ProfileSource::Cached,
                lock_checks: 0,
                woke_on_save: false,
            });
        }

        let key = profile_lock_key(owner_id);
        let max_checks = self.ctx.config.admission_max_attempts.max(1);
        let interval = self.ctx.config.admission_retry_interval;

        // Subscribe before the first check so an acknowledgement published
        // between a check and the wait is not missed.
        let mut saved = match self.ctx.channel.subscribe(&local_saved_topic(owner_id)).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                tracing::debug!("No early wake for {}: {}", owner_id, e);
                None
            }
        };

        let mut state = AdmissionState::CheckingLock;
        let mut checks = 0;
        let mut woke_on_save = false;
        let mut source = ProfileSource::Stored;

        loop {
            let next = match state {
                AdmissionState::CheckingLock => {
                    checks += 1;
                    let held = match self.ctx.coordination.exists(&key).await {
                        Ok(held) => held,
                        Err(e) => {
                            tracing::warn!("Lock check for {} failed, treating as held: {}", owner_id, e);
                            true
                        }
                    };

                    if !held {
                        AdmissionState::Allowed
                    } else if checks >= max_checks {
                        AdmissionState::Rejected
                    } else {
                        tracing::debug!(
                            "Profile {} locked (check {}/{}), waiting {:?}",
                            owner_id,
                            checks,
                            max_checks,
                            interval
                        );
                        AdmissionState::RetryWait
                    }
                }
                AdmissionState::RetryWait => {
                    if wait_for_retry(&mut saved, interval).await {
                        tracing::debug!("Save of {} acknowledged, skipping wait", owner_id);
                        woke_on_save = true;
                        AdmissionState::Allowed
                    } else {
                        AdmissionState::CheckingLock
                    }
                }
                AdmissionState::Allowed => AdmissionState::Loading,
                AdmissionState::Loading => {
                    let (profile, loaded_from) = self.load(owner_id, default_name).await?;
                    source = loaded_from;
                    if !self.node.install(profile).await? {
                        source = ProfileSource::Cached;
                    }
                    AdmissionState::Active
                }
                AdmissionState::Active => {
                    tracing::info!(
                        "Admitted {} ({:?}, {} lock check(s))",
                        owner_id,
                        source,
                        checks
                    );
                    return Ok(Admission {
                        owner_id: owner_id.clone(),
                        source,
                        lock_checks: checks,
                        woke_on_save,
                    });
                }
                AdmissionState::Rejected => {
                    let err = SyncError::LockTimeout {
                        owner_id: owner_id.clone(),
                        attempts: checks,
                    };
                    tracing::warn!("Rejected {}: {}", owner_id, err.user_reason());
                    return Err(err);
                }
            };

            tracing::trace!("Admission {}: {:?} -> {:?}", owner_id, state, next);
            state = next;
        }
    }

    async fn load(&self, owner_id: &OwnerId, default_name: &str) -> SyncResult<(Profile, ProfileSource)> {
        match self.ctx.store.load(owner_id, default_name).await {
            Ok(profile) => Ok((profile, ProfileSource::Stored)),
            Err(e) if e.is_transient() => {
                tracing::error!(
                    "Store unavailable loading {}, starting with an empty profile: {}",
                    owner_id,
                    e
                );
                Ok((
                    Profile::new(owner_id.clone(), default_name),
                    ProfileSource::Synthesized,
                ))
            }
            Err(e) => {
                tracing::error!("Refusing {}: {}", owner_id, e);
                Err(e)
            }
        }
    }
}

/// Sleeps one retry interval, returning `true` if a save acknowledgement
/// arrived first.
async fn wait_for_retry(saved: &mut Option<Subscription>, interval: Duration) -> bool {
    let deadline = Instant::now() + interval;

    let wake = match saved.as_mut() {
        Some(subscription) => tokio::select! {
            _ = tokio::time::sleep_until(deadline) => Wake::Timer,
            message = subscription.recv() => match message {
                Some(_) => Wake::Saved,
                None => Wake::Closed,
            },
        },
        None => {
            tokio::time::sleep_until(deadline).await;
            Wake::Timer
        }
    };

    match wake {
        Wake::Timer => false,
        Wake::Saved => true,
        Wake::Closed => {
            *saved = None;
            tokio::time::sleep_until(deadline).await;
            false
        }
    }
}
