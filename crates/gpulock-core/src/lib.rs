//! gpulock-core: Core types for distributed GPU locking
//!
//! This crate provides the pieces shared by every other gpulock crate:
//! - Resource records parsed from a GPU process snapshot
//! - Self-occupancy detection and resource key derivation
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod gpu;

pub use config::*;
pub use error::*;
pub use gpu::*;
