//! Forensics audit trail: event format, sinks, and the rotating file writer.

pub mod audit;
pub mod sink;
pub mod writer;

pub use audit::{AuditEvent, AuditStatus, AuditTimezone, Severity, initiators};
pub use sink::{AuditLog, AuditSink, MemorySink};
