//! Cooperative cancellation: SIGTERM/SIGINT set a shared flag that drivers
//! poll between targets.
//!
//! Uses the `signal-hook` crate for safe signal registration. Nothing is
//! interrupted mid-operation; a driver finishes the target it is working on
//! (including its terminal audit event) before it observes the flag.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Thread-safe shutdown flag shared between signal handlers and drivers.
#[derive(Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// A flag with no OS signal hooks (tests, library embedding).
    pub fn new() -> Self {
        Self::default()
    }

    /// A flag wired to SIGTERM and SIGINT.
    ///
    /// Registration is best-effort; failures are reported on stderr but not fatal.
    #[cfg(feature = "signals")]
    pub fn with_os_signals() -> Self {
        use signal_hook::consts::{SIGINT, SIGTERM};

        let flag = Self::new();
        for (name, signal) in [("SIGTERM", SIGTERM), ("SIGINT", SIGINT)] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&flag.requested)) {
                eprintln!("[RMINE-SIGNAL] failed to register {name}: {e}");
            }
        }
        flag
    }

    /// Whether a shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }

    /// Programmatically request shutdown.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for ShutdownFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownFlag")
            .field("requested", &self.is_requested())
            .finish()
    }
}
