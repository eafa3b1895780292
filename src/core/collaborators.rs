//! Narrow interfaces to the analysis tools that sit next to the miner.
//!
//! The miner does not parse source files, count lint findings, or compute
//! frequency tables itself. Those tools consume the repositories the miner
//! keeps; these traits are the seams they plug into.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failure reported by a collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The input could not be parsed.
    #[error("parse failure in {path}: {details}")]
    Parse { path: PathBuf, details: String },
    /// The input could not be read.
    #[error("unreadable input {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parses a source file into a syntax tree.
pub trait SyntaxTreeParser {
    /// Opaque tree handle.
    type Tree;

    /// Parse `path`, or report why it could not be parsed.
    fn parse(&self, path: &Path) -> Result<Self::Tree, CollaboratorError>;
}

/// Counts logging statements (or other lint findings) in one source file.
pub trait LintCounter {
    /// Count findings in `path`. Unreadable input counts as zero.
    fn count(&self, path: &Path) -> u64;
}

/// Aggregates event counts from a delimited text file.
pub trait FrequencyCounter {
    /// Count occurrences per category in `path`.
    fn count(&self, path: &Path) -> Result<BTreeMap<String, u64>, CollaboratorError>;
}

/// Apply a lint counter to every file a scan visited, summing the results.
pub fn total_lint_count<L: LintCounter + ?Sized>(counter: &L, files: &[PathBuf]) -> u64 {
    files.iter().map(|f| counter.count(f)).sum()
}
