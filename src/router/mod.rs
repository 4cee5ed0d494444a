//! Router Module
//!
//! Runs on the proxy that moves sessions between nodes. Its only job in the
//! synchronization protocol is the save step: request a flush from the old
//! node and wait, bounded, for the acknowledgement before handing the session
//! to the new node.
//!
//! ## Submodules
//! - **`coordinator`**: waiter table, timeout policy and the `SessionTransfer` seam.
//! - **`protocol`**, **`handlers`**: HTTP switch API.

pub mod coordinator;
pub mod handlers;
pub mod protocol;
