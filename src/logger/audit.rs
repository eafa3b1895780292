//! Forensics audit events and their stable one-line text format.
//!
//! Every state-changing operation produces exactly one [`AuditEvent`] per
//! attempt. The text form is append-only and meant to be grepped and parsed
//! by downstream tooling:
//!
//! ```text
//! 2026-03-02 14:07:31 UTC INFO [Forensics] status=success initiator=delete_repo target=/data/repos/org@repo type=NO_FILES tz=UTC
//! ```
//!
//! Values that are empty or contain whitespace, `"`, `=` or `\` are written as
//! double-quoted strings with backslash escapes. [`AuditEvent::parse_line`]
//! reads the format back.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt::{self, Display, Write as _};
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Marker that prefixes the structured part of every audit line.
pub const FORENSICS_TAG: &str = "[Forensics]";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Operation names recorded in the `initiator` field.
pub mod initiators {
    pub const CLONE_REPO: &str = "clone_repo";
    pub const CLONE_REPOS: &str = "clone_repos";
    pub const DELETE_REPO: &str = "delete_repo";
    pub const DELETE_REPOS: &str = "delete_repos";
    pub const RETENTION_FILTER: &str = "retention_filter";
    pub const ML_LIBRARY_USAGE: &str = "ml_library_usage";
    pub const ML_LIBRARY_USAGE_FILE: &str = "ml_library_usage_file";
    pub const ML_STATS: &str = "ml_stats";
}

// ──────────────────── timezone ────────────────────

/// Timezone used to stamp audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditTimezone {
    Utc,
    /// The host's local zone, labelled by its current UTC offset.
    Local,
    Fixed(FixedOffset),
}

impl AuditTimezone {
    /// Parse `UTC`, `local`, or a fixed offset `+HH:MM` / `-HH:MM`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("utc") || trimmed == "Z" {
            return Some(Self::Utc);
        }
        if trimmed.eq_ignore_ascii_case("local") {
            return Some(Self::Local);
        }
        parse_offset(trimmed).map(Self::Fixed)
    }

    /// Current time in this zone.
    pub fn now(&self) -> DateTime<FixedOffset> {
        match self {
            Self::Utc => Utc::now().fixed_offset(),
            Self::Local => Local::now().fixed_offset(),
            Self::Fixed(offset) => Utc::now().with_timezone(offset),
        }
    }

    /// Short label written after the timestamp and in the `tz` field.
    ///
    /// Zones other than UTC are labelled by numeric offset (`+02:00`), never
    /// by abbreviation.
    pub fn label(&self, at: &DateTime<FixedOffset>) -> String {
        match self {
            Self::Utc => "UTC".to_string(),
            Self::Local | Self::Fixed(_) => at.offset().to_string(),
        }
    }
}

fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    if hours.len() != 2 || minutes.len() != 2 {
        return None;
    }
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn offset_for_label(label: &str) -> Option<FixedOffset> {
    match AuditTimezone::parse(label)? {
        AuditTimezone::Utc => FixedOffset::east_opt(0),
        AuditTimezone::Fixed(offset) => Some(offset),
        AuditTimezone::Local => None,
    }
}

// ──────────────────── status & severity ────────────────────

/// Outcome recorded in the `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Start,
    Success,
    NotFound,
    Failure,
    Cloned,
    Kept,
    DeletedNoFiles,
    #[serde(rename = "deleted_low_python")]
    DeletedLowProportion,
    Skipped,
}

impl AuditStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Success => "success",
            Self::NotFound => "not_found",
            Self::Failure => "failure",
            Self::Cloned => "cloned",
            Self::Kept => "kept",
            Self::DeletedNoFiles => "deleted_no_files",
            Self::DeletedLowProportion => "deleted_low_python",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_str_opt(raw: &str) -> Option<Self> {
        Some(match raw {
            "start" => Self::Start,
            "success" => Self::Success,
            "not_found" => Self::NotFound,
            "failure" => Self::Failure,
            "cloned" => Self::Cloned,
            "kept" => Self::Kept,
            "deleted_no_files" => Self::DeletedNoFiles,
            "deleted_low_python" => Self::DeletedLowProportion,
            "skipped" => Self::Skipped,
            _ => return None,
        })
    }

    /// Failures are errors; everything else (including not-found) is info.
    pub const fn severity(self) -> Severity {
        match self {
            Self::Failure => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity level written after the timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Error,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Error => "ERROR",
        }
    }
}

// ──────────────────── event ────────────────────

/// One forensics record.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub timestamp: DateTime<FixedOffset>,
    pub tz: String,
    pub status: AuditStatus,
    pub initiator: String,
    pub target: String,
    /// Operation-specific context, in insertion order.
    pub fields: Vec<(String, String)>,
    pub error: Option<String>,
}

impl AuditEvent {
    /// A new event stamped with the current UTC time.
    ///
    /// [`AuditLog::record`](crate::logger::sink::AuditLog::record) restamps
    /// it in the configured zone.
    pub fn new(status: AuditStatus, initiator: &str, target: impl Display) -> Self {
        Self {
            timestamp: Utc::now().fixed_offset(),
            tz: "UTC".to_string(),
            status,
            initiator: initiator.to_string(),
            target: target.to_string(),
            fields: Vec::new(),
            error: None,
        }
    }

    /// Append a context field. Keys are identifiers (`[A-Za-z0-9_]+`).
    #[must_use]
    pub fn field(mut self, key: &str, value: impl Display) -> Self {
        debug_assert!(
            !key.is_empty() && key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'),
            "audit field keys must be identifiers: {key:?}"
        );
        self.fields.push((key.to_string(), value.to_string()));
        self
    }

    /// Attach error detail.
    #[must_use]
    pub fn error(mut self, detail: impl Display) -> Self {
        self.error = Some(detail.to_string());
        self
    }

    /// Restamp with the current time in `tz`.
    #[must_use]
    pub fn stamped(mut self, tz: AuditTimezone) -> Self {
        let now = tz.now();
        self.tz = tz.label(&now);
        self.timestamp = now;
        self
    }

    pub fn severity(&self) -> Severity {
        self.status.severity()
    }

    /// Look up a context field by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Render the stable one-line text form (no trailing newline).
    pub fn to_line(&self) -> String {
        let mut line = String::with_capacity(160);
        let _ = write!(
            line,
            "{} {} {} {FORENSICS_TAG} status={} initiator={} target={}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.tz,
            self.severity().as_str(),
            self.status,
            quote(&self.initiator),
            quote(&self.target),
        );
        for (key, value) in &self.fields {
            let _ = write!(line, " {key}={}", quote(value));
        }
        let _ = write!(line, " tz={}", quote(&self.tz));
        if let Some(error) = &self.error {
            let _ = write!(line, " error={}", quote(error));
        }
        line
    }

    /// Render as a single JSON object (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let record = JsonRecord {
            ts: self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, false),
            tz: &self.tz,
            severity: self.severity(),
            status: self.status,
            initiator: &self.initiator,
            target: &self.target,
            context: self
                .fields
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
            error: self.error.as_deref(),
        };
        serde_json::to_string(&record)
    }

    /// Parse a line produced by [`to_line`](Self::to_line).
    ///
    /// Returns `None` for lines that are not audit records (other log output
    /// interleaved in the same file is skipped by callers).
    pub fn parse_line(line: &str) -> Option<Self> {
        static HEADER: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(
                r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) (\S+) (INFO|ERROR) \[Forensics\] (.*)$",
            )
            .expect("audit header regex is valid")
        });
        static PAIR: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r#"(\w+)=("(?:[^"\\]|\\.)*"|\S*)"#).expect("audit pair regex is valid")
        });

        let caps = HEADER.captures(line.trim_end_matches(['\r', '\n']))?;
        let naive = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT).ok()?;
        let tz_label = caps[2].to_string();
        let offset = offset_for_label(&tz_label)?;
        let timestamp = naive.and_local_timezone(offset).single()?;

        let mut status = None;
        let mut initiator = None;
        let mut target = None;
        let mut error = None;
        let mut fields = Vec::new();
        for pair in PAIR.captures_iter(&caps[4]) {
            let key = &pair[1];
            let value = unquote(&pair[2]);
            match key {
                "status" => status = AuditStatus::from_str_opt(&value),
                "initiator" => initiator = Some(value),
                "target" => target = Some(value),
                "error" => error = Some(value),
                "tz" => {}
                _ => fields.push((key.to_string(), value)),
            }
        }

        Some(Self {
            timestamp,
            tz: tz_label,
            status: status?,
            initiator: initiator?,
            target: target?,
            fields,
            error,
        })
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    ts: String,
    tz: &'a str,
    severity: Severity,
    status: AuditStatus,
    initiator: &'a str,
    target: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    context: BTreeMap<&'a str, &'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

// ──────────────────── quoting ────────────────────

fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '=' | '\\'))
}

fn quote(value: &str) -> String {
    if !needs_quotes(value) {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn unquote(raw: &str) -> String {
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return raw.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
