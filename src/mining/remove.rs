//! Idempotent recursive removal of a local repository directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::errors::FailureKind;
use crate::logger::audit::{AuditEvent, AuditStatus, initiators};
use crate::logger::sink::AuditLog;

/// Result of one removal attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Success { path: PathBuf },
    /// Nothing existed at the path.
    NotFound { path: PathBuf },
    Failure { path: PathBuf, detail: String },
}

impl DeleteOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::Success { path } | Self::NotFound { path } | Self::Failure { path, .. } => path,
        }
    }

    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

/// Deletes directories and records one audit event per call.
#[derive(Debug, Clone)]
pub struct DirectoryRemover {
    audit: AuditLog,
}

impl DirectoryRemover {
    pub fn new(audit: AuditLog) -> Self {
        Self { audit }
    }

    /// Remove `path` and everything below it.
    ///
    /// `reason` is recorded as the `type` field. Never returns an error;
    /// filesystem failures become [`DeleteOutcome::Failure`].
    pub fn remove(&self, path: &Path, reason: &str) -> DeleteOutcome {
        let outcome = match delete_path(path) {
            Ok(true) => DeleteOutcome::Success {
                path: path.to_path_buf(),
            },
            Ok(false) => DeleteOutcome::NotFound {
                path: path.to_path_buf(),
            },
            Err(err) => DeleteOutcome::Failure {
                path: path.to_path_buf(),
                detail: err.to_string(),
            },
        };

        let event = match &outcome {
            DeleteOutcome::Success { .. } => {
                AuditEvent::new(AuditStatus::Success, initiators::DELETE_REPO, path.display())
            }
            DeleteOutcome::NotFound { .. } => {
                AuditEvent::new(AuditStatus::NotFound, initiators::DELETE_REPO, path.display())
            }
            DeleteOutcome::Failure { detail, .. } => {
                AuditEvent::new(AuditStatus::Failure, initiators::DELETE_REPO, path.display())
                    .field("kind", FailureKind::Io)
                    .error(detail)
            }
        };
        self.audit.record(event.field("type", reason));
        outcome
    }
}

/// `Ok(true)` when something was removed, `Ok(false)` when nothing existed.
fn delete_path(path: &Path) -> io::Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };

    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Ok(()) => {}
        // Raced with another remover.
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    }

    if fs::symlink_metadata(path).is_ok() {
        return Err(io::Error::other(format!(
            "path still exists after deletion: {}",
            path.display()
        )));
    }
    Ok(true)
}
