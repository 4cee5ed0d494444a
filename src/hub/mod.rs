//! Hub Module
//!
//! Lets nodes and routers in separate processes share one profile table, one
//! lock table and one message bus.
//!
//! ## Architecture Overview
//! - **Hub process**: serves the profile table (`MemoryProfileBackend`) and
//!   the lock table (`MemoryCoordinationStore`) over HTTP, and fans published
//!   messages out as UDP datagrams to registered subscribers.
//! - **Clients**: `HubClient` implements `ProfileBackend` and
//!   `CoordinationStore`; `RemoteSyncChannel` implements `SyncChannel`. Node
//!   and router code never knows whether it talks to the hub or to the
//!   in-process implementations.
//!
//! ## Submodules
//! - **`protocol`**: endpoints and DTOs.
//! - **`handlers`**: axum handlers.
//! - **`fanout`**: subscriber table and datagram delivery.
//! - **`server`**: hub state, router and background sweepers.
//! - **`client`**: the client side of all of the above.

pub mod client;
pub mod fanout;
pub mod handlers;
pub mod protocol;
pub mod server;
