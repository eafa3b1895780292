#![forbid(unsafe_code)]

//! Repository miner: bulk-clone source repositories, keep the ones written
//! mostly in one language, and measure machine-learning framework usage.
//!
//! The pipeline has three stages:
//! 1. **Clone**: fetch each repository with an external VCS client, in
//!    batches, with bounded parallelism and retry
//! 2. **Retention filter**: delete clones whose language proportion is
//!    below the threshold, or that contain no files at all
//! 3. **Usage stats**: count source lines that mention a known ML framework,
//!    per repository
//!
//! Every mutating step appends a forensic line to the audit log.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use ml_repo_miner::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use ml_repo_miner::core::config::Config;
//! use ml_repo_miner::mining::orchestrator::CloneDriver;
//! ```

pub mod prelude;

pub mod core;
pub mod logger;
pub mod mining;
