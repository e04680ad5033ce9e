//! gpulock-store: Lock stores and quorum locking
//!
//! This crate provides the distributed mutual-exclusion layer:
//! - The `LockStore` trait every backend implements
//! - An in-memory store and a Redis-backed store
//! - The quorum lock client issuing time-bounded leases

pub mod memory;
pub mod quorum;
pub mod redis_store;
pub mod traits;

pub use memory::MemoryStore;
pub use quorum::{Lease, QuorumConfig, QuorumLockClient, ReleaseOutcome};
pub use redis_store::{open_stores, RedisStore};
pub use traits::LockStore;
