//! Profile Module
//!
//! The per-owner data record and everything that shapes it in memory.
//!
//! ## Core Concepts
//! - **Profile**: owner id, display name, typed module slices and an unknown-data bucket.
//! - **Registry**: tag -> decoder table contributed by feature modules at startup.
//! - **Codec**: one JSON document per profile; per-entry failures never abort a decode.
//! - **Cache**: the profiles with an active session on this node.

pub mod cache;
pub mod codec;
pub mod registry;
pub mod types;
