//! Audit sinks and the [`AuditLog`] handle passed to every component.
//!
//! The handle is built once at process start from [`AuditConfig`] and cloned
//! into the drivers; there is no global logger. Tests use [`MemorySink`].

#![allow(missing_docs)]

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::config::AuditConfig;
use crate::core::errors::{MinerError, Result};
use crate::logger::audit::{AuditEvent, AuditTimezone};
use crate::logger::writer::{LogFileConfig, LogFileWriter};

/// Destination for audit events. Each call writes one complete line.
pub trait AuditSink: Send + Sync {
    fn write_event(&self, event: &AuditEvent);

    /// Push buffered data to stable storage.
    fn flush(&self) {}
}

/// `key=value` text lines (the forensics log proper).
pub struct LineFileSink {
    writer: Mutex<LogFileWriter>,
}

impl LineFileSink {
    pub fn open(config: LogFileConfig) -> Self {
        Self {
            writer: Mutex::new(LogFileWriter::open(config)),
        }
    }
}

impl AuditSink for LineFileSink {
    fn write_event(&self, event: &AuditEvent) {
        let line = event.to_line();
        self.writer.lock().write_line(&line);
    }

    fn flush(&self) {
        self.writer.lock().sync();
    }
}

/// One JSON object per event.
pub struct JsonlSink {
    writer: Mutex<LogFileWriter>,
}

impl JsonlSink {
    pub fn open(config: LogFileConfig) -> Self {
        Self {
            writer: Mutex::new(LogFileWriter::open(config)),
        }
    }
}

impl AuditSink for JsonlSink {
    fn write_event(&self, event: &AuditEvent) {
        match event.to_json_line() {
            Ok(line) => self.writer.lock().write_line(&line),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[RMINE-JSONL] serialize error: {e}");
            }
        }
    }

    fn flush(&self) {
        self.writer.lock().sync();
    }
}

/// Echoes audit lines on stderr.
pub struct StderrSink;

impl AuditSink for StderrSink {
    fn write_event(&self, event: &AuditEvent) {
        let mut line = event.to_line();
        line.push('\n');
        let _ = io::stderr().lock().write_all(line.as_bytes());
    }
}

/// Collects events in memory.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditSink for MemorySink {
    fn write_event(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

struct AuditLogInner {
    timezone: AuditTimezone,
    sinks: Vec<Arc<dyn AuditSink>>,
}

/// Cheaply cloneable handle that stamps events and fans them out to sinks.
#[derive(Clone)]
pub struct AuditLog {
    inner: Arc<AuditLogInner>,
}

impl AuditLog {
    /// A log with no sinks; events are stamped and dropped.
    pub fn new(timezone: AuditTimezone) -> Self {
        Self {
            inner: Arc::new(AuditLogInner {
                timezone,
                sinks: Vec::new(),
            }),
        }
    }

    /// Builder: add a sink. Only valid before the handle is cloned.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.sinks.push(sink),
            None => {
                let mut sinks = self.inner.sinks.clone();
                sinks.push(sink);
                self.inner = Arc::new(AuditLogInner {
                    timezone: self.inner.timezone,
                    sinks,
                });
            }
        }
        self
    }

    /// Build the sinks described by `config`.
    pub fn from_config(config: &AuditConfig) -> Result<Self> {
        let timezone =
            AuditTimezone::parse(&config.timezone).ok_or_else(|| MinerError::InvalidConfig {
                details: format!("audit.timezone {:?} is not recognized", config.timezone),
            })?;

        let mut log = Self::new(timezone).with_sink(Arc::new(LineFileSink::open(LogFileConfig {
            path: config.log_path.clone(),
            fallback_path: config.fallback_path.clone(),
            max_size_bytes: config.max_size_bytes,
            max_rotated_files: config.max_rotated_files,
            stderr_prefix: "[RMINE-AUDIT]",
        })));
        if let Some(jsonl_path) = &config.jsonl_path {
            log = log.with_sink(Arc::new(JsonlSink::open(LogFileConfig {
                path: jsonl_path.clone(),
                fallback_path: None,
                max_size_bytes: config.max_size_bytes,
                max_rotated_files: config.max_rotated_files,
                stderr_prefix: "[RMINE-JSONL]",
            })));
        }
        if config.echo_stderr {
            log = log.with_sink(Arc::new(StderrSink));
        }
        Ok(log)
    }

    /// A log backed only by a [`MemorySink`], which is returned for inspection.
    pub fn in_memory() -> (Self, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let log = Self::new(AuditTimezone::Utc).with_sink(Arc::clone(&sink) as Arc<dyn AuditSink>);
        (log, sink)
    }

    pub fn timezone(&self) -> AuditTimezone {
        self.inner.timezone
    }

    /// Stamp `event` in the configured zone and write it to every sink.
    pub fn record(&self, event: AuditEvent) {
        let event = event.stamped(self.inner.timezone);
        for sink in &self.inner.sinks {
            sink.write_event(&event);
        }
    }

    pub fn flush(&self) {
        for sink in &self.inner.sinks {
            sink.flush();
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("timezone", &self.inner.timezone)
            .field("sinks", &self.inner.sinks.len())
            .finish()
    }
}
