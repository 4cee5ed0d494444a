//! Node Module
//!
//! Everything a game-server node runs to keep profiles consistent across
//! server switches.
//!
//! ## Lifecycle
//! 1. **Join**: the `AdmissionGate` waits for any in-flight save of the
//!    profile (the `lock:profile:<owner>` key) before loading it.
//! 2. **Play**: the profile lives in the node runtime's cache and is only
//!    mutated on that task (`NodeHandle::with_profile`).
//! 3. **Save on request**: the `SaveRequestListener` flushes an active profile
//!    when the router asks, without ending the session.
//! 4. **Leave**: the `DisconnectHandler` detaches, locks, saves, announces and
//!    releases.
//! 5. **Shutdown**: `flush_all` persists everything left within a deadline.
//!
//! ## Submodules
//! - **`runtime`**: the single mutation task and its handle.
//! - **`admission`**, **`disconnect`**, **`listener`**, **`shutdown`**: the hooks above.
//! - **`service`**: wires the hooks over one `SyncContext`.
//! - **`protocol`**, **`handlers`**: HTTP session API.

pub mod admission;
pub mod disconnect;
pub mod handlers;
pub mod listener;
pub mod protocol;
pub mod runtime;
pub mod service;
pub mod shutdown;

#[cfg(test)]
mod tests;
