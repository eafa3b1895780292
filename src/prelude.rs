//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use ml_repo_miner::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{FailureKind, MinerError, Result};
pub use crate::core::signals::ShutdownFlag;
pub use crate::core::target::RepoTarget;

// Logger
pub use crate::logger::{AuditEvent, AuditLog, AuditStatus, AuditTimezone};

// Mining
pub use crate::mining::batch::{Batch, batches};
pub use crate::mining::clone::{CloneBackend, CloneOutcome, CommandBackend, RepoCloner};
pub use crate::mining::orchestrator::{
    CloneDriver, CloneRunSummary, DeleteRunSummary, ListDeleteDriver,
};
pub use crate::mining::remove::{DeleteOutcome, DirectoryRemover};
pub use crate::mining::retention::{RetentionFilter, RetentionPolicy, Verdict};
pub use crate::mining::signatures::SignatureSet;
pub use crate::mining::stats::{RepoUsage, StatsAggregator};
pub use crate::mining::usage::{UsageReport, UsageScanner};
