//! Keep/delete decision applied to every freshly cloned repository.
//!
//! A repository is kept when the proportion of its files carrying the target
//! language extension is at least the threshold. Empty repositories and
//! repositories below the threshold are removed, and the removal is tagged
//! with the reason so the audit trail explains every deletion.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::path::Path;

use crate::core::config::RetentionConfig;
use crate::logger::audit::{AuditEvent, AuditStatus, initiators};
use crate::logger::sink::AuditLog;
use crate::mining::count::count_files;
use crate::mining::remove::{DeleteOutcome, DirectoryRemover};

/// Removal tag for repositories without any regular file.
pub const NO_FILES_TAG: &str = "NO_FILES";

/// Verdict for one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Kept,
    DeletedNoFiles,
    DeletedLowProportion,
}

impl Verdict {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kept => "kept",
            Self::DeletedNoFiles => "deleted_no_files",
            Self::DeletedLowProportion => "deleted_low_proportion",
        }
    }

    pub const fn deletes(self) -> bool {
        !matches!(self, Self::Kept)
    }

    pub const fn audit_status(self) -> AuditStatus {
        match self {
            Self::Kept => AuditStatus::Kept,
            Self::DeletedNoFiles => AuditStatus::DeletedNoFiles,
            Self::DeletedLowProportion => AuditStatus::DeletedLowProportion,
        }
    }
}

/// Pure decision from the two counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionDecision {
    pub total_files: u64,
    pub lang_files: u64,
    /// `None` when the repository has no files.
    pub proportion: Option<f64>,
    pub verdict: Verdict,
}

/// Threshold and tag formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    pub threshold: f64,
    pub precision: u32,
    pub extension: String,
    pub language_label: String,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_config(&RetentionConfig::default())
    }
}

impl RetentionPolicy {
    pub fn from_config(config: &RetentionConfig) -> Self {
        Self {
            threshold: config.threshold,
            precision: config.precision,
            extension: config.extension.clone(),
            language_label: config.language_label.clone(),
        }
    }

    /// Decide from counts. The comparison is strict: a proportion equal to
    /// the threshold is kept.
    pub fn decide(&self, total_files: u64, lang_files: u64) -> RetentionDecision {
        if total_files == 0 {
            return RetentionDecision {
                total_files,
                lang_files,
                proportion: None,
                verdict: Verdict::DeletedNoFiles,
            };
        }
        let proportion = lang_files as f64 / total_files as f64;
        let verdict = if proportion < self.threshold {
            Verdict::DeletedLowProportion
        } else {
            Verdict::Kept
        };
        RetentionDecision {
            total_files,
            lang_files,
            proportion: Some(proportion),
            verdict,
        }
    }

    /// Proportion rounded to `precision` decimals, as text.
    pub fn format_proportion(&self, proportion: f64) -> String {
        let precision = self.precision as usize;
        let rounded = format!("{proportion:.precision$}");
        // Match the shortest form (0.25000 -> 0.25, 0.00000 -> 0.0).
        if rounded.contains('.') {
            let trimmed = rounded.trim_end_matches('0');
            if trimmed.ends_with('.') {
                format!("{trimmed}0")
            } else {
                trimmed.to_string()
            }
        } else {
            rounded
        }
    }

    /// Removal tag for a deleting decision; `None` when the repo is kept.
    pub fn removal_tag(&self, decision: &RetentionDecision) -> Option<String> {
        match (decision.verdict, decision.proportion) {
            (Verdict::Kept, _) => None,
            (Verdict::DeletedNoFiles, _) | (Verdict::DeletedLowProportion, None) => {
                Some(NO_FILES_TAG.to_string())
            }
            (Verdict::DeletedLowProportion, Some(p)) => Some(format!(
                "LOW_{}_{}",
                self.language_label,
                self.format_proportion(p)
            )),
        }
    }
}

/// Result of applying the filter to one directory.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionReport {
    pub decision: RetentionDecision,
    /// Present when the verdict deleted the directory.
    pub removal: Option<DeleteOutcome>,
}

/// Counts, decides, and removes.
#[derive(Debug, Clone)]
pub struct RetentionFilter {
    policy: RetentionPolicy,
    remover: DirectoryRemover,
    audit: AuditLog,
}

impl RetentionFilter {
    pub fn new(policy: RetentionPolicy, audit: AuditLog) -> Self {
        Self {
            policy,
            remover: DirectoryRemover::new(audit.clone()),
            audit,
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Apply the policy to a cloned repository at `dir`.
    pub fn apply(&self, dir: &Path) -> RetentionReport {
        let (total, lang) = count_files(dir, &self.policy.extension);
        let decision = self.policy.decide(total, lang);

        let mut event = AuditEvent::new(
            decision.verdict.audit_status(),
            initiators::RETENTION_FILTER,
            dir.display(),
        )
        .field("total_files", decision.total_files)
        .field("lang_files", decision.lang_files);
        if let Some(p) = decision.proportion {
            event = event.field("proportion", self.policy.format_proportion(p));
        }
        self.audit
            .record(event.field("verdict", decision.verdict.as_str()));

        let removal = self
            .policy
            .removal_tag(&decision)
            .map(|tag| self.remover.remove(dir, &tag));

        RetentionReport { decision, removal }
    }
}
