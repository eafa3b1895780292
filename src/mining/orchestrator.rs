//! Batch drivers: clone-and-filter over a URL list, and delete over a
//! candidate list.
//!
//! Per-target failures never stop a run; they are audited and counted. The
//! only terminal failures are an unusable mining root, an invalid batch size,
//! and an unreadable candidate list.
//!
//! Cancellation is cooperative: the shutdown flag is checked before each
//! target, so the target in flight always reaches its terminal audit event.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use rand::Rng;
use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::{FailureKind, MinerError, Result};
use crate::core::signals::ShutdownFlag;
use crate::core::target::RepoTarget;
use crate::logger::audit::{AuditEvent, AuditStatus, initiators};
use crate::logger::sink::AuditLog;
use crate::mining::batch::{Batch, Batches, batches};
use crate::mining::candidates::read_unique_column;
use crate::mining::clone::{CloneOutcome, RepoCloner};
use crate::mining::locks::PathLocks;
use crate::mining::remove::{DeleteOutcome, DirectoryRemover};
use crate::mining::retention::{RetentionFilter, RetentionPolicy, Verdict};

/// Removal tag for list-driven deletions.
pub const ML_LIBRARY_THRESHOLD_TAG: &str = "ML_LIBRARY_THRESHOLD";
/// Removal tag for a partial clone cleared before the next attempt.
pub const RETRY_CLEANUP_TAG: &str = "RETRY_CLEANUP";

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

// ──────────────────── retry ────────────────────

/// Bounded retry with exponential backoff and jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the wait after failed attempt `attempt` (1-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Jittered wait in `[ceiling / 2, ceiling]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = u64::try_from(self.ceiling(attempt).as_millis()).unwrap_or(u64::MAX);
        let millis = rand::rng().random_range(ceiling / 2..=ceiling);
        Duration::from_millis(millis)
    }
}

// ──────────────────── summaries ────────────────────

/// What happened to one target in a clone run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetDisposition {
    Cloned,
    DeletedNoFiles,
    DeletedLowProportion,
    Failed,
    /// Not attempted because shutdown was requested.
    Skipped,
}

/// Counts for a clone run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CloneRunSummary {
    pub cloned: u64,
    pub deleted_no_files: u64,
    pub deleted_low_proportion: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl CloneRunSummary {
    pub fn record(&mut self, disposition: TargetDisposition) {
        match disposition {
            TargetDisposition::Cloned => self.cloned += 1,
            TargetDisposition::DeletedNoFiles => self.deleted_no_files += 1,
            TargetDisposition::DeletedLowProportion => self.deleted_low_proportion += 1,
            TargetDisposition::Failed => self.failed += 1,
            TargetDisposition::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.cloned
            + self.deleted_no_files
            + self.deleted_low_proportion
            + self.failed
            + self.skipped
    }
}

/// Counts for a list-delete run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteRunSummary {
    pub removed: u64,
    pub not_found: u64,
    pub failed: u64,
    pub skipped: u64,
}

// ──────────────────── clone driver ────────────────────

/// Static settings for a [`CloneDriver`].
#[derive(Debug, Clone)]
pub struct CloneSettings {
    pub mining_root: PathBuf,
    pub dir_separator: String,
    pub batch_size: usize,
    pub parallelism: usize,
    pub retry: RetryPolicy,
}

impl CloneSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mining_root: config.paths.mining_root.clone(),
            dir_separator: config.clone.dir_separator.clone(),
            batch_size: config.clone.batch_size,
            parallelism: config.clone.parallelism,
            retry: RetryPolicy {
                max_attempts: config.clone.max_attempts,
                base_delay: Duration::from_millis(config.clone.backoff_base_ms),
                max_delay: Duration::from_millis(config.clone.backoff_max_ms),
            },
        }
    }
}

/// Clones each target, then keeps or removes it by the retention policy.
#[derive(Debug, Clone)]
pub struct CloneDriver {
    cloner: RepoCloner,
    filter: RetentionFilter,
    remover: DirectoryRemover,
    audit: AuditLog,
    settings: CloneSettings,
    locks: PathLocks,
    shutdown: ShutdownFlag,
}

impl CloneDriver {
    pub fn new(
        cloner: RepoCloner,
        filter: RetentionFilter,
        audit: AuditLog,
        settings: CloneSettings,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            cloner,
            filter,
            remover: DirectoryRemover::new(audit.clone()),
            audit,
            settings,
            locks: PathLocks::new(),
            shutdown,
        }
    }

    /// Wire the external client, retention policy and settings from `config`.
    pub fn from_config(config: &Config, audit: AuditLog, shutdown: ShutdownFlag) -> Self {
        Self::new(
            RepoCloner::from_config(&config.clone, audit.clone()),
            RetentionFilter::new(RetentionPolicy::from_config(&config.retention), audit.clone()),
            audit,
            CloneSettings::from_config(config),
            shutdown,
        )
    }

    pub fn settings(&self) -> &CloneSettings {
        &self.settings
    }

    /// Partition `identifiers` into batches and run them.
    pub fn run(&self, identifiers: &[String]) -> Result<CloneRunSummary> {
        self.run_batches(batches(identifiers, self.settings.batch_size)?)
    }

    /// Run pre-built batches in order.
    pub fn run_batches(&self, batches: Batches<'_, String>) -> Result<CloneRunSummary> {
        let root = &self.settings.mining_root;
        if let Err(err) = fs::create_dir_all(root) {
            self.audit.record(
                AuditEvent::new(AuditStatus::Failure, initiators::CLONE_REPOS, root.display())
                    .field("kind", FailureKind::from_io(&err))
                    .error(&err),
            );
            return Err(MinerError::io(root, err));
        }

        let started = Instant::now();
        let batch_count = batches.len();
        self.audit.record(
            AuditEvent::new(AuditStatus::Start, initiators::CLONE_REPOS, root.display())
                .field("batch_count", batch_count)
                .field("parallelism", self.settings.parallelism.max(1)),
        );

        let mut summary = CloneRunSummary::default();
        for batch in batches {
            self.run_batch(batch, &mut summary);
        }

        let status = if summary.skipped > 0 {
            AuditStatus::Skipped
        } else {
            AuditStatus::Success
        };
        self.audit.record(
            AuditEvent::new(status, initiators::CLONE_REPOS, root.display())
                .field("cloned", summary.cloned)
                .field("deleted_no_files", summary.deleted_no_files)
                .field("deleted_low_python", summary.deleted_low_proportion)
                .field("failed", summary.failed)
                .field("skipped", summary.skipped)
                .field(
                    "duration_ms",
                    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                ),
        );
        self.audit.flush();
        Ok(summary)
    }

    fn run_batch(&self, batch: Batch<'_, String>, summary: &mut CloneRunSummary) {
        let workers = self.settings.parallelism.clamp(1, batch.items.len().max(1));
        if workers == 1 {
            for identifier in batch.items {
                summary.record(self.process(identifier, batch.index));
            }
            return;
        }

        // Capacity covers the whole batch, so seeding never blocks.
        let (work_tx, work_rx) = channel::bounded::<&String>(batch.items.len());
        let (result_tx, result_rx) = channel::unbounded::<TargetDisposition>();
        for identifier in batch.items {
            let _ = work_tx.send(identifier);
        }
        drop(work_tx);

        thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for identifier in work_rx.iter() {
                        if result_tx.send(self.process(identifier, batch.index)).is_err() {
                            return;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        for disposition in result_rx.try_iter() {
            summary.record(disposition);
        }
    }

    /// Clone, filter, and audit one target.
    fn process(&self, identifier: &str, batch_index: usize) -> TargetDisposition {
        if self.shutdown.is_requested() {
            return TargetDisposition::Skipped;
        }

        let target = match RepoTarget::new(identifier, &self.settings.dir_separator) {
            Ok(target) => target,
            Err(err) => {
                self.audit.record(
                    AuditEvent::new(AuditStatus::Failure, initiators::CLONE_REPOS, identifier)
                        .field("dirName", "")
                        .field("batch", batch_index)
                        .field("attempts", 0)
                        .field("kind", FailureKind::InputMalformed)
                        .error(&err),
                );
                return TargetDisposition::Failed;
            }
        };
        let local_dir = target.local_dir(&self.settings.mining_root);
        let _guard = self.locks.lock(&local_dir);

        let outcome = self.clone_with_retry(&target, &local_dir);
        let event = |status| {
            AuditEvent::new(status, initiators::CLONE_REPOS, &target)
                .field("dirName", local_dir.display())
                .field("batch", batch_index)
                .field("attempts", outcome.attempts())
        };

        if let CloneOutcome::Failure { kind, detail, .. } = &outcome {
            self.audit.record(
                event(AuditStatus::Failure)
                    .field("cause", kind.as_str())
                    .error(detail),
            );
            return TargetDisposition::Failed;
        }

        let report = self.filter.apply(&local_dir);
        let disposition = match report.decision.verdict {
            Verdict::Kept => TargetDisposition::Cloned,
            Verdict::DeletedNoFiles => TargetDisposition::DeletedNoFiles,
            Verdict::DeletedLowProportion => TargetDisposition::DeletedLowProportion,
        };
        let status = match disposition {
            TargetDisposition::DeletedNoFiles => AuditStatus::DeletedNoFiles,
            TargetDisposition::DeletedLowProportion => AuditStatus::DeletedLowProportion,
            _ => AuditStatus::Cloned,
        };
        let mut outcome_event = event(status);
        if let Some(p) = report.decision.proportion {
            outcome_event =
                outcome_event.field("proportion", self.filter.policy().format_proportion(p));
        }
        if let Some(DeleteOutcome::Failure { detail, .. }) = &report.removal {
            outcome_event = outcome_event.field("removed", false).error(detail);
        }
        self.audit.record(outcome_event);
        disposition
    }

    fn clone_with_retry(&self, target: &RepoTarget, local_dir: &Path) -> CloneOutcome {
        let retry = self.settings.retry;
        let mut attempt = 1;
        loop {
            let outcome = self.cloner.clone_repo(target, local_dir, attempt);
            let retryable = matches!(
                &outcome,
                CloneOutcome::Failure { kind, .. } if kind.is_retryable()
            );
            if !retryable || attempt >= retry.max_attempts {
                return outcome;
            }
            if !self.sleep_unless_shutdown(retry.delay(attempt)) {
                return outcome;
            }
            // A killed or failed client can leave a partial checkout that the
            // next attempt would refuse to overwrite.
            if fs::symlink_metadata(local_dir).is_ok()
                && self.remover.remove(local_dir, RETRY_CLEANUP_TAG).is_failure()
            {
                return outcome;
            }
            attempt += 1;
        }
    }

    /// Sleep for `total`; `false` if shutdown was requested meanwhile.
    fn sleep_unless_shutdown(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.shutdown.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SHUTDOWN_POLL));
        }
    }
}

// ──────────────────── list-delete driver ────────────────────

/// Deletes every directory named in a candidate list.
#[derive(Debug, Clone)]
pub struct ListDeleteDriver {
    remover: DirectoryRemover,
    audit: AuditLog,
    column: String,
    delimiter: u8,
    shutdown: ShutdownFlag,
}

impl ListDeleteDriver {
    pub fn new(
        audit: AuditLog,
        column: impl Into<String>,
        delimiter: u8,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            remover: DirectoryRemover::new(audit.clone()),
            audit,
            column: column.into(),
            delimiter,
            shutdown,
        }
    }

    pub fn from_config(config: &Config, audit: AuditLog, shutdown: ShutdownFlag) -> Self {
        Self::new(
            audit,
            config.input.candidate_column.clone(),
            config.input.delimiter_byte(),
            shutdown,
        )
    }

    /// Read `list`, de-duplicate, and remove each path.
    ///
    /// An unreadable or malformed list is audited once and returned as `Err`.
    pub fn run(&self, list: &Path) -> Result<DeleteRunSummary> {
        let candidates = match read_unique_column(list, &self.column, self.delimiter) {
            Ok(candidates) => candidates,
            Err(err) => {
                let kind = match &err {
                    MinerError::Io { source, .. } => FailureKind::from_io(source),
                    _ => FailureKind::InputMalformed,
                };
                self.audit.record(
                    AuditEvent::new(AuditStatus::Failure, initiators::DELETE_REPOS, list.display())
                        .field("kind", kind)
                        .error(&err),
                );
                return Err(err);
            }
        };

        let mut summary = DeleteRunSummary::default();
        for candidate in &candidates {
            if self.shutdown.is_requested() {
                summary.skipped += 1;
                continue;
            }
            match self
                .remover
                .remove(Path::new(candidate), ML_LIBRARY_THRESHOLD_TAG)
            {
                DeleteOutcome::Success { .. } => summary.removed += 1,
                DeleteOutcome::NotFound { .. } => summary.not_found += 1,
                DeleteOutcome::Failure { .. } => summary.failed += 1,
            }
        }

        let status = if summary.skipped > 0 {
            AuditStatus::Skipped
        } else {
            AuditStatus::Success
        };
        self.audit.record(
            AuditEvent::new(status, initiators::DELETE_REPOS, list.display())
                .field("candidates", candidates.len())
                .field("removed", summary.removed)
                .field("not_found", summary.not_found)
                .field("failed", summary.failed)
                .field("skipped", summary.skipped),
        );
        self.audit.flush();
        Ok(summary)
    }
}
