//! Repository targets: remote identifier plus the derived local directory name.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{MinerError, Result};

/// Default separator between the owner and repository segments.
pub const DEFAULT_DIR_SEPARATOR: &str = "@";

/// A remote repository locator and the local directory name it maps to.
///
/// The local name is the identifier's last two `/`-separated segments joined
/// by a separator, e.g. `https://github.com/org/repo` -> `org@repo`. Two
/// identifiers that share those segments (different hosts or protocols) map
/// to the same name; the later clone overwrites the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoTarget {
    identifier: String,
    dir_name: String,
}

impl RepoTarget {
    /// Build a target, deriving the local directory name with `separator`.
    pub fn new(identifier: impl Into<String>, separator: &str) -> Result<Self> {
        let identifier = identifier.into();
        let dir_name = derive_dir_name(&identifier, separator)?;
        Ok(Self {
            identifier,
            dir_name,
        })
    }

    /// The remote identifier as given (URL or path).
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Derived local directory name (`org@repo`).
    pub fn dir_name(&self) -> &str {
        &self.dir_name
    }

    /// Full local path of this target under a mining root.
    pub fn local_dir(&self, mining_root: &Path) -> PathBuf {
        mining_root.join(&self.dir_name)
    }
}

impl fmt::Display for RepoTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier)
    }
}

fn derive_dir_name(identifier: &str, separator: &str) -> Result<String> {
    let invalid = |reason: &str| MinerError::InvalidTarget {
        identifier: identifier.to_string(),
        reason: reason.to_string(),
    };

    let mut segments = identifier.rsplit('/');
    let repo = segments.next().unwrap_or_default();
    let Some(owner) = segments.next() else {
        return Err(invalid("expected at least two '/'-separated segments"));
    };
    if repo.is_empty() || owner.is_empty() {
        return Err(invalid("owner and repository segments must be non-empty"));
    }
    if matches!(repo, "." | "..") || matches!(owner, "." | "..") {
        return Err(invalid("relative path segments are not allowed"));
    }

    Ok(format!("{owner}{separator}{repo}"))
}
