//! Cross-Server Profile Synchronization Library
//!
//! Keeps a player's profile consistent while the player moves between game
//! server nodes behind a proxy. A profile has exactly one authoritative live
//! copy at a time; a node about to load it waits until any other node has
//! finished saving it.
//!
//! ## Architecture Modules
//! - **`profile`**: the profile aggregate, its module registry, the JSON codec
//!   and the per-node cache of active profiles.
//! - **`storage`**: the persistence seam (`ProfileBackend`) and the async
//!   `ProfileStore` with its bounded worker pool.
//! - **`coordination`**: advisory TTL locks (`CoordinationStore`) and the
//!   best-effort publish/subscribe `SyncChannel`.
//! - **`node`**: admission gate, disconnect handler, save-request listener and
//!   shutdown flush around a single mutation task.
//! - **`router`**: the save step a proxy runs before switching a session.
//! - **`hub`**: a small shared service exposing store, locks and fan-out to
//!   separate node and router processes.
//! - **`context`**, **`config`**, **`error`**: process-wide wiring, timing
//!   parameters and the error taxonomy.

pub mod config;
pub mod context;
pub mod coordination;
pub mod error;
pub mod hub;
pub mod node;
pub mod profile;
pub mod router;
pub mod storage;

#[cfg(test)]
mod testing;
