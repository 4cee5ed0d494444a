//! Router API
//!
//! Endpoint and DTOs for requesting a server switch.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Moves a session to another node after the save step.
pub const ENDPOINT_SWITCH: &str = "/switch";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct SwitchRequest {
    pub owner_id: String,
    /// HTTP address (`host:port`) of the destination node.
    pub target: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SwitchResponse {
    pub switched: bool,
    /// `true` if the old node acknowledged the save before the switch.
    pub save_confirmed: bool,
    pub waited_ms: u64,
    pub reason: Option<String>,
}
