//! Append-only line writer shared by the audit sinks.
//!
//! Every line goes out in a single `write_all` on a file opened with
//! `O_APPEND`, so a line is never split across another writer's output and a
//! crash loses at most the line being written.
//!
//! Four-level fallback chain:
//! 1. Primary file path
//! 2. Fallback path (e.g. the system temp dir)
//! 3. stderr with the sink's prefix
//! 4. Silent discard (mining must never abort for logging failures)

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::core::errors::{MinerError, Result};

/// Degradation state of a [`LogFileWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Normal,
    Fallback,
    Stderr,
    Discard,
}

impl WriterState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Fallback => "fallback",
            Self::Stderr => "stderr",
            Self::Discard => "discard",
        }
    }
}

/// Where and how a [`LogFileWriter`] writes.
#[derive(Debug, Clone)]
pub struct LogFileConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Rotate before a write would push the file past this size.
    pub max_size_bytes: u64,
    /// Rotated generations kept (`.1` newest).
    pub max_rotated_files: u32,
    /// Prefix for stderr diagnostics and stderr-mode lines, e.g. `[RMINE-AUDIT]`.
    pub stderr_prefix: &'static str,
}

/// Append-only line writer with rotation and multi-level fallback.
pub struct LogFileWriter {
    config: LogFileConfig,
    file: Option<File>,
    state: WriterState,
    bytes_written: u64,
}

impl LogFileWriter {
    /// Open the primary path, falling through the chain on failure.
    pub fn open(config: LogFileConfig) -> Self {
        let mut w = Self {
            config,
            file: None,
            state: WriterState::Discard,
            bytes_written: 0,
        };
        w.open_primary();
        w
    }

    /// Append one line. A trailing newline is added when missing.
    pub fn write_line(&mut self, line: &str) {
        if line.ends_with('\n') {
            self.write_raw(line);
        } else {
            let mut owned = String::with_capacity(line.len() + 1);
            owned.push_str(line);
            owned.push('\n');
            self.write_raw(&owned);
        }
    }

    /// Force written data to stable storage.
    pub fn sync(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
            let _ = file.sync_data();
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    // ──────────────────────── internals ────────────────────────

    fn write_raw(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.bytes_written > 0
            && self.bytes_written + len > self.config.max_size_bytes
            && matches!(self.state, WriterState::Normal | WriterState::Fallback)
        {
            self.rotate();
        }

        match self.state {
            WriterState::Normal | WriterState::Fallback => {
                let written = self
                    .file
                    .as_mut()
                    .is_some_and(|f| f.write_all(line.as_bytes()).is_ok());
                if written {
                    self.bytes_written += len;
                } else {
                    self.degrade();
                    self.write_raw(line);
                }
            }
            WriterState::Stderr => {
                let _ = write!(io::stderr(), "{} {line}", self.config.stderr_prefix);
            }
            WriterState::Discard => {}
        }
    }

    fn open_primary(&mut self) {
        match open_append(&self.config.path) {
            Ok((file, size)) => {
                self.file = Some(file);
                self.state = WriterState::Normal;
                self.bytes_written = size;
            }
            Err(_) => self.open_fallback(),
        }
    }

    fn open_fallback(&mut self) {
        let prefix = self.config.stderr_prefix;
        let Some(fallback) = self.config.fallback_path.clone() else {
            self.state = WriterState::Stderr;
            let _ = writeln!(
                io::stderr(),
                "{prefix} primary path failed and no fallback configured, using stderr"
            );
            return;
        };
        match open_append(&fallback) {
            Ok((file, size)) => {
                let _ = writeln!(
                    io::stderr(),
                    "{prefix} primary path failed, using fallback: {}",
                    fallback.display()
                );
                self.file = Some(file);
                self.state = WriterState::Fallback;
                self.bytes_written = size;
            }
            Err(_) => {
                self.state = WriterState::Stderr;
                let _ = writeln!(
                    io::stderr(),
                    "{prefix} both primary and fallback paths failed, using stderr"
                );
            }
        }
    }

    fn degrade(&mut self) {
        self.file = None;
        match self.state {
            WriterState::Normal => self.open_fallback(),
            WriterState::Fallback => {
                self.state = WriterState::Stderr;
                let _ = writeln!(
                    io::stderr(),
                    "{} fallback write failed, using stderr",
                    self.config.stderr_prefix
                );
            }
            WriterState::Stderr => self.state = WriterState::Discard,
            WriterState::Discard => {}
        }
    }

    fn rotate(&mut self) {
        let base = match self.state {
            WriterState::Normal => self.config.path.clone(),
            WriterState::Fallback => match &self.config.fallback_path {
                Some(p) => p.clone(),
                None => return,
            },
            WriterState::Stderr | WriterState::Discard => return,
        };
        if let Some(file) = self.file.as_mut() {
            let _ = file.sync_data();
        }
        self.file = None;

        // .N-1 → .N, …, .1 → .2, then current → .1
        let _ = fs::remove_file(rotated_name(&base, self.config.max_rotated_files));
        for i in (1..self.config.max_rotated_files).rev() {
            let _ = rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        if self.config.max_rotated_files == 0 {
            let _ = fs::remove_file(&base);
        } else {
            let _ = rename(&base, rotated_name(&base, 1));
        }

        match open_append(&base) {
            Ok((file, _)) => {
                self.file = Some(file);
                self.bytes_written = 0;
            }
            Err(_) => self.degrade(),
        }
    }
}

// ──────────────────────── helpers ────────────────────────

/// Open or create a file for appending. Returns `(File, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| MinerError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| MinerError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `forensics.log` → `forensics.log.3`.
pub(crate) fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}
