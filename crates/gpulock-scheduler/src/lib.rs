//! gpulock-scheduler: GPU selection for gpulock
//!
//! This crate turns a GPU process snapshot into an exclusive GPU:
//! - Probing the local GPUs
//! - Ordering idle candidates
//! - Driving the quorum lock client until a lease is won

pub mod probe;
pub mod scheduler;
pub mod selector;

pub use probe::{CommandProbe, ResourceProbe, StaticProbe};
pub use scheduler::{select_resource, LeaseOrchestrator, ReleaseHandle, Selection, SelectionState};
pub use selector::CandidateSelector;
