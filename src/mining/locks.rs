//! Per-path mutual exclusion for clone workers.
//!
//! Two targets can map to the same local directory; holding the path lock
//! for the whole clone-and-filter sequence keeps their operations from
//! interleaving.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct Shared {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

/// Set of currently locked paths.
#[derive(Clone, Default)]
pub struct PathLocks {
    shared: Arc<Shared>,
}

/// Held lock; released on drop.
pub struct PathGuard {
    shared: Arc<Shared>,
    path: PathBuf,
}

impl PathLocks {
    /// Create an empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `path` is free, then hold it.
    pub fn lock(&self, path: &Path) -> PathGuard {
        let mut held = self.shared.held.lock();
        while held.contains(path) {
            self.shared.released.wait(&mut held);
        }
        held.insert(path.to_path_buf());
        PathGuard {
            shared: Arc::clone(&self.shared),
            path: path.to_path_buf(),
        }
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        self.shared.held.lock().remove(&self.path);
        self.shared.released.notify_all();
    }
}

impl std::fmt::Debug for PathLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathLocks")
            .field("held", &self.shared.held.lock().len())
            .finish()
    }
}
