//! Built-in drivers.
//!
//! - [`memory`] - size-bounded in-process cache with TTLs and counters
//! - [`redb`] - single-file page store with ordered pagination
//! - [`sled`] - log-structured store with TTLs, pagination and a
//!   background expiry sweep
//! - [`redis`] - pooled Redis client with TTLs and counters (feature
//!   `redis`)

pub mod memory;
pub mod redb;
#[cfg(feature = "redis")]
pub mod redis;
pub mod sled;
