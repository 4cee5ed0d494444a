//! Profile Storage Module
//!
//! Durable load/save of profiles.
//!
//! ## Core Concepts
//! - **Backend**: the persisted relation (`owner_id` primary key, `display_name`, `data`),
//!   written with idempotent upserts.
//! - **Store**: codec + bounded worker pool + read retry on top of any backend.
//! - **Memory backend**: the in-process table used by the hub and by tests.

pub mod backend;
pub mod memory;
pub mod store;

#[cfg(test)]
mod tests;
