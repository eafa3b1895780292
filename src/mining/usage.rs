//! Per-repository ML framework usage count.
//!
//! Files are read as raw bytes and lowercased in ASCII, so undecodable input
//! never fails a scan. Each non-empty line that contains any signature adds
//! exactly one to the count.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use memchr::memchr_iter;
use walkdir::WalkDir;

use crate::core::config::ScanConfig;
use crate::core::errors::FailureKind;
use crate::logger::audit::{AuditEvent, AuditStatus, initiators};
use crate::logger::sink::AuditLog;
use crate::mining::count::has_extension;
use crate::mining::signatures::SignatureSet;

/// Outcome of scanning one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageReport {
    pub usage_count: u64,
    pub files_scanned: u64,
    pub files_failed: u64,
    /// False when part of the tree could not be enumerated.
    pub complete: bool,
}

/// Walks a repository and counts signature lines.
#[derive(Debug, Clone)]
pub struct UsageScanner {
    signatures: SignatureSet,
    extension: String,
    audit: AuditLog,
}

impl UsageScanner {
    pub fn new(signatures: SignatureSet, extension: impl Into<String>, audit: AuditLog) -> Self {
        Self {
            signatures,
            extension: extension.into(),
            audit,
        }
    }

    pub fn from_config(config: &ScanConfig, audit: AuditLog) -> Self {
        Self::new(
            SignatureSet::new(config.all_signatures()),
            config.extension.clone(),
            audit,
        )
    }

    /// Scan `root`. Never fails: problems are audited and reflected in the report.
    pub fn scan(&self, root: &Path) -> UsageReport {
        let mut report = UsageReport {
            usage_count: 0,
            files_scanned: 0,
            files_failed: 0,
            complete: true,
        };
        let mut root_error = None;

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    report.complete = false;
                    if err.depth() == 0 {
                        root_error = Some(err.to_string());
                        break;
                    }
                    let path = err.path().unwrap_or(root);
                    self.record_file_failure(path, FailureKind::Io, &err.to_string());
                    continue;
                }
            };
            if !entry.file_type().is_file() || !has_extension(entry.file_name(), &self.extension)
            {
                continue;
            }
            match fs::read(entry.path()) {
                Ok(bytes) => {
                    report.files_scanned += 1;
                    report.usage_count += count_matching_lines(&bytes, &self.signatures);
                }
                Err(err) => {
                    report.files_failed += 1;
                    self.record_file_failure(
                        entry.path(),
                        FailureKind::from_io(&err),
                        &err.to_string(),
                    );
                }
            }
        }

        let base = |status| {
            AuditEvent::new(status, initiators::ML_LIBRARY_USAGE, root.display())
                .field("usageCount", report.usage_count)
                .field("files_scanned", report.files_scanned)
                .field("files_failed", report.files_failed)
        };
        let event = match root_error {
            Some(detail) => base(AuditStatus::Failure)
                .field("kind", FailureKind::NotFound)
                .error(detail),
            None if !report.complete => {
                base(AuditStatus::Failure).error("directory walk was incomplete")
            }
            None => base(AuditStatus::Success),
        };
        self.audit.record(event);
        report
    }

    fn record_file_failure(&self, path: &Path, kind: FailureKind, detail: &str) {
        self.audit.record(
            AuditEvent::new(
                AuditStatus::Failure,
                initiators::ML_LIBRARY_USAGE_FILE,
                path.display(),
            )
            .field("kind", kind)
            .error(detail),
        );
    }
}

/// Count lines of `bytes` that contain a signature after ASCII lowercasing.
pub fn count_matching_lines(bytes: &[u8], signatures: &SignatureSet) -> u64 {
    let mut count = 0;
    let mut lowered = Vec::new();
    let mut start = 0;
    let ends = memchr_iter(b'\n', bytes).chain(std::iter::once(bytes.len()));
    for end in ends {
        let line = &bytes[start..end];
        start = end + 1;
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        lowered.clear();
        lowered.extend(line.iter().map(u8::to_ascii_lowercase));
        if signatures.matches(&lowered) {
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> (UsageScanner, std::sync::Arc<crate::logger::sink::MemorySink>) {
        let (log, sink) = AuditLog::in_memory();
        (UsageScanner::new(SignatureSet::defaults(), ".py", log), sink)
    }

    #[test]
    fn one_increment_per_line() {
        let text = b"import tensorflow as tf\nfrom sklearn import svm\n\nimport os\nTORCH.cuda\n";
        assert_eq!(count_matching_lines(text, &SignatureSet::defaults()), 3);
    }

    #[test]
    fn ordinary_lines_containing_tf_letters_count_zero() {
        let text = b"# -*- coding: utf-8 -*-\nwith open(outfile) as f:\nimport os\n";
        assert_eq!(count_matching_lines(text, &SignatureSet::defaults()), 0);
        assert_eq!(count_matching_lines(b"y = tf.nn.relu(x)\n", &SignatureSet::defaults()), 1);
    }

    #[test]
    fn last_line_without_newline_counts() {
        assert_eq!(count_matching_lines(b"x = 1\nimport keras", &SignatureSet::defaults()), 1);
        assert_eq!(count_matching_lines(b"", &SignatureSet::defaults()), 0);
    }

    #[test]
    fn invalid_utf8_is_tolerated() {
        let mut bytes = b"# caf\xe9 \xff\xfe\n".to_vec();
        bytes.extend_from_slice(b"import Keras\xff\n");
        assert_eq!(count_matching_lines(&bytes, &SignatureSet::defaults()), 1);
    }

    #[test]
    fn scans_only_language_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/model.py"), "import torch\nimport keras\n").unwrap();
        fs::write(dir.path().join("README.md"), "uses torch\n").unwrap();
        let (scanner, sink) = scanner();

        let report = scanner.scan(dir.path());
        assert_eq!(report.usage_count, 2);
        assert_eq!(report.files_scanned, 1);
        assert!(report.complete);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, AuditStatus::Success);
        assert_eq!(events[0].get("usageCount"), Some("2"));
    }

    #[test]
    fn missing_root_is_a_failure_event() {
        let dir = tempfile::tempdir().unwrap();
        let (scanner, sink) = scanner();

        let report = scanner.scan(&dir.path().join("vanished"));
        assert_eq!(report.usage_count, 0);
        assert!(!report.complete);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, AuditStatus::Failure);
        assert!(events[0].error.is_some());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_contributes_zero() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ok.py"), "import sklearn\n").unwrap();
        let locked = dir.path().join("locked.py");
        fs::write(&locked, "import torch\n").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // Root can read anything.
        let readable_anyway = fs::read(&locked).is_ok();
        let (scanner, sink) = scanner();

        let report = scanner.scan(dir.path());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();

        if readable_anyway {
            assert_eq!(report.usage_count, 2);
            return;
        }
        assert_eq!(report.usage_count, 1);
        assert_eq!(report.files_failed, 1);
        assert!(report.complete);
        let events = sink.events();
        assert_eq!(events[0].initiator, "ml_library_usage_file");
        assert_eq!(events.last().unwrap().status, AuditStatus::Success);
    }
}
