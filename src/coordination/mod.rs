//! Coordination Module
//!
//! The only state shared between node and router processes.
//!
//! ## Core Concepts
//! - **CoordinationStore**: TTL-bound advisory locks under `lock:profile:<owner_id>`.
//! - **SyncChannel**: best-effort pub/sub for save requests and acknowledgements.
//!
//! Both are traits; the in-memory implementations serve a single process and
//! the hub, and `hub::client` provides the cross-process versions.

pub mod channel;
pub mod lock;
