//! RMN-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, MinerError>;

/// Top-level error type for the repository miner.
///
/// Per-target failures (a clone that exits non-zero, a directory that cannot
/// be removed, an unreadable source file) are reported as outcome values and
/// audit events, not as `MinerError`. This type covers the failures that end
/// a whole run or reject caller input.
#[derive(Debug, Error)]
pub enum MinerError {
    #[error("[RMN-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[RMN-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[RMN-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[RMN-1101] batch size must be positive, got {size}")]
    InvalidBatchSize { size: usize },

    #[error("[RMN-1102] invalid repository identifier {identifier:?}: {reason}")]
    InvalidTarget { identifier: String, reason: String },

    #[error("[RMN-2001] input list {path} is malformed: {details}")]
    InputMalformed { path: PathBuf, details: String },

    #[error("[RMN-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[RMN-3001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

}

impl MinerError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "RMN-1001",
            Self::MissingConfig { .. } => "RMN-1002",
            Self::ConfigParse { .. } => "RMN-1003",
            Self::InvalidBatchSize { .. } => "RMN-1101",
            Self::InvalidTarget { .. } => "RMN-1102",
            Self::InputMalformed { .. } => "RMN-2001",
            Self::Serialization { .. } => "RMN-2101",
            Self::Io { .. } => "RMN-3001",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Classification of a per-target failure, recorded as the `kind` audit field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The external VCS client could not be started or exited non-zero.
    ExternalProcess,
    Timeout,
    NotFound,
    Io,
    Decode,
    InputMalformed,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExternalProcess => "external_process",
            Self::Timeout => "timeout",
            Self::NotFound => "not_found",
            Self::Io => "io",
            Self::Decode => "decode",
            Self::InputMalformed => "input_malformed",
        }
    }

    /// Classify an I/O error: missing paths are `NotFound`, the rest `Io`.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::InvalidData => Self::Decode,
            _ => Self::Io,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<serde_json::Error> for MinerError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for MinerError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
