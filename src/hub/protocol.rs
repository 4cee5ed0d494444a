//! Hub Network Protocol
//!
//! Endpoints and DTOs through which nodes and routers reach the shared
//! profile table, the lock table and the message fan-out. Requests are JSON
//! over HTTP; fanned-out messages travel as bincode `SyncMessage` datagrams.

use crate::profile::types::{OwnerId, ProfileRecord};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

// --- API Endpoints ---

/// Upserts a `ProfileRecord`.
pub const ENDPOINT_PROFILE: &str = "/profile";
/// Reads one row. A missing row is `200` with `record: None`.
pub const ENDPOINT_PROFILE_FETCH: &str = "/profile/fetch";
/// Set-if-absent with TTL.
pub const ENDPOINT_LOCK_ACQUIRE: &str = "/lock/acquire";
pub const ENDPOINT_LOCK_RELEASE: &str = "/lock/release";
/// Reports whether a key is held.
pub const ENDPOINT_LOCK_STATUS: &str = "/lock/status";
/// Fans a message out to every matching subscriber.
pub const ENDPOINT_PUBLISH: &str = "/sync/publish";
/// Registers a UDP address for a topic pattern.
pub const ENDPOINT_SUBSCRIBE: &str = "/sync/subscribe";

// --- Data Transfer Objects ---

/// Ids and keys travel in bodies, never in the path: owner ids are opaque
/// and may contain `/`, `?` or `#`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FetchProfileRequest {
    pub owner_id: OwnerId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchProfileResponse {
    pub record: Option<ProfileRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcquireLockRequest {
    pub key: String,
    pub ttl_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcquireLockResponse {
    pub acquired: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseLockRequest {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockStatusRequest {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockStatusResponse {
    pub key: String,
    pub held: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Datagrams sent.
    pub delivered: usize,
}

/// Subscriptions expire unless refreshed within `SUBSCRIPTION_TTL`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub pattern: String,
    pub udp_addr: SocketAddr,
}
