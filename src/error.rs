//! Error taxonomy for the profile synchronization layer.
//!
//! No variant here is allowed to take a node down. Each one degrades to
//! "deny this operation", "skip this module entry" or "log and proceed";
//! the shutdown flush deadline is the only path that ends in a process exit.

use crate::profile::types::OwnerId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Store, coordination store or hub unreachable.
    #[error("transient I/O failure during {operation}: {message}")]
    TransientIo {
        operation: &'static str,
        message: String,
    },

    /// The root document could not be parsed.
    #[error("malformed profile document: {0}")]
    Decode(String),

    /// A module payload could not be serialised.
    #[error("failed to encode module '{module_key}': {message}")]
    Encode { module_key: String, message: String },

    #[error("lock for profile {owner_id} still held after {attempts} checks")]
    LockTimeout { owner_id: OwnerId, attempts: usize },

    #[error("no save acknowledgement for profile {owner_id} within {timeout_ms}ms")]
    SaveTimeout { owner_id: OwnerId, timeout_ms: u64 },

    #[error("{lost} profile(s) not flushed before the shutdown deadline")]
    ShutdownFlushTimeout { lost: usize },

    #[error("profile {0} is not active on this node")]
    NotActive(OwnerId),

    #[error("node runtime stopped")]
    NodeStopped,
}

impl SyncError {
    pub fn transient(operation: &'static str, err: impl std::fmt::Display) -> Self {
        SyncError::TransientIo {
            operation,
            message: err.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientIo { .. })
    }

    /// Text shown to a player whose session was refused.
    pub fn user_reason(&self) -> &'static str {
        match self {
            SyncError::LockTimeout { .. } => "previous session still saving",
            SyncError::SaveTimeout { .. } => "previous server did not confirm the save",
            SyncError::Decode(_) => "stored profile is unreadable",
            SyncError::TransientIo { .. } => "profile storage unavailable",
            _ => "profile unavailable",
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
