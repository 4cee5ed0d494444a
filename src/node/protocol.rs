//! Node Session API
//!
//! HTTP contract between the game server (or router) and a node's session
//! lifecycle hooks.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Session start: runs admission and loads the profile.
pub const ENDPOINT_SESSION_JOIN: &str = "/session/join";
/// Session end: detaches and saves the profile.
pub const ENDPOINT_SESSION_LEAVE: &str = "/session/leave";
/// Read-only view of an active profile document (`/session/:owner_id`).
pub const ENDPOINT_SESSION: &str = "/session";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    pub owner_id: String,
    /// Name for a first-time profile. Defaults to the owner id.
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinResponse {
    pub admitted: bool,
    /// User-facing refusal text.
    pub reason: Option<String>,
    pub lock_checks: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub owner_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaveResponse {
    pub saved: bool,
    pub saved_at_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub display_name: Option<String>,
    /// Encoded profile document.
    pub document: Option<serde_json::Value>,
}
