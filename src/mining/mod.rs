//! The mining pipeline: clone, retention filter, delete, scan, aggregate.

pub mod batch;
pub mod candidates;
pub mod clone;
pub mod count;
pub mod locks;
pub mod orchestrator;
pub mod remove;
pub mod retention;
pub mod signatures;
pub mod stats;
pub mod usage;
