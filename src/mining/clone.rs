//! Repository cloning through an external VCS client.
//!
//! The client is any program plus an argument template; `{url}` and `{dest}`
//! are substituted on every call. One call is one attempt: retries are the
//! driver's job.

#![allow(missing_docs)]

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use parking_lot::Mutex;

use crate::core::config::{CloneConfig, DEST_PLACEHOLDER, URL_PLACEHOLDER};
use crate::core::errors::FailureKind;
use crate::core::target::RepoTarget;
use crate::logger::audit::{AuditEvent, AuditStatus, initiators};
use crate::logger::sink::AuditLog;

/// Captured stderr kept in failure detail.
pub const MAX_DETAIL_BYTES: usize = 4096;

const POLL_START: Duration = Duration::from_millis(10);
const POLL_MAX: Duration = Duration::from_millis(200);

// ──────────────────── outcomes ────────────────────

/// Why a clone attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloneFailureKind {
    /// The client program could not be started.
    Spawn,
    NonZeroExit,
    Timeout,
}

impl CloneFailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spawn => "spawn",
            Self::NonZeroExit => "non_zero_exit",
            Self::Timeout => "timeout",
        }
    }

    /// Transient failures worth another attempt.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::NonZeroExit | Self::Timeout)
    }

    const fn failure_kind(self) -> FailureKind {
        match self {
            Self::Spawn | Self::NonZeroExit => FailureKind::ExternalProcess,
            Self::Timeout => FailureKind::Timeout,
        }
    }
}

/// Error reported by a [`CloneBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneError {
    pub kind: CloneFailureKind,
    pub detail: String,
}

/// Result of cloning one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneOutcome {
    Success {
        target: RepoTarget,
        local_dir: PathBuf,
        attempts: u32,
    },
    Failure {
        target: RepoTarget,
        local_dir: PathBuf,
        kind: CloneFailureKind,
        detail: String,
        attempts: u32,
    },
}

impl CloneOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn local_dir(&self) -> &Path {
        match self {
            Self::Success { local_dir, .. } | Self::Failure { local_dir, .. } => local_dir,
        }
    }

    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Failure { attempts, .. } => *attempts,
        }
    }
}

// ──────────────────── backend ────────────────────

/// Fetches a remote repository into a local directory.
pub trait CloneBackend: Send + Sync {
    fn fetch(&self, identifier: &str, dest: &Path) -> Result<(), CloneError>;
}

/// Runs an external program with a templated argument list.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &CloneConfig) -> Self {
        Self::new(
            config.program.clone(),
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// The argument list for one call.
    pub fn render_args(&self, identifier: &str, dest: &Path) -> Vec<String> {
        let dest = dest.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(URL_PLACEHOLDER, identifier)
                    .replace(DEST_PLACEHOLDER, &dest)
            })
            .collect()
    }
}

impl CloneBackend for CommandBackend {
    fn fetch(&self, identifier: &str, dest: &Path) -> Result<(), CloneError> {
        let mut child = Command::new(&self.program)
            .args(self.render_args(identifier, dest))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CloneError {
                kind: CloneFailureKind::Spawn,
                detail: format!("failed to execute {}: {e}", self.program),
            })?;

        let deadline = Instant::now().checked_add(self.timeout);
        let stderr = child.stderr.take().map(StderrCapture::spawn);
        let collect_stderr = |capture: Option<StderrCapture>| {
            capture
                .map(|c| tail_detail(&String::from_utf8_lossy(&c.collect(deadline))))
                .unwrap_or_default()
        };

        match wait_with_timeout(&mut child, self.timeout) {
            Ok(Some(status)) if status.success() => {
                drop(stderr);
                Ok(())
            }
            Ok(Some(status)) => {
                let captured = collect_stderr(stderr);
                let detail = if captured.is_empty() {
                    format!("{} exited with {status}", self.program)
                } else {
                    format!("{} exited with {status}: {captured}", self.program)
                };
                Err(CloneError {
                    kind: CloneFailureKind::NonZeroExit,
                    detail,
                })
            }
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(CloneError {
                    kind: CloneFailureKind::Timeout,
                    detail: format!(
                        "{} did not finish within {:?} and was killed",
                        self.program, self.timeout
                    ),
                })
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(CloneError {
                    kind: CloneFailureKind::NonZeroExit,
                    detail: format!("failed to wait for {}: {e}", self.program),
                })
            }
        }
    }
}

/// Drains a child's stderr on a detached thread.
///
/// A grandchild that inherited the pipe can hold it open after the client
/// exits, so collection is bounded by a deadline and returns what has been
/// read so far.
struct StderrCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    done: channel::Receiver<()>,
}

impl StderrCapture {
    fn spawn(mut pipe: ChildStderr) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done) = channel::bounded(1);
        let shared = Arc::clone(&buf);
        thread::spawn(move || {
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let mut buf = shared.lock();
                        buf.extend_from_slice(&chunk[..n]);
                        // Only the tail ends up in the detail.
                        if buf.len() > 4 * MAX_DETAIL_BYTES {
                            let excess = buf.len() - 2 * MAX_DETAIL_BYTES;
                            buf.drain(..excess);
                        }
                    }
                }
            }
            let _ = done_tx.send(());
        });
        Self { buf, done }
    }

    /// Wait for EOF until `deadline`, then return the captured bytes.
    fn collect(self, deadline: Option<Instant>) -> Vec<u8> {
        let _ = match deadline {
            Some(deadline) => self.done.recv_deadline(deadline).is_ok(),
            None => self.done.recv().is_ok(),
        };
        std::mem::take(&mut *self.buf.lock())
    }
}

/// Poll until the child exits or `timeout` elapses (`Ok(None)`).
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let start = Instant::now();
    let mut delay = POLL_START;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Ok(None);
        }
        thread::sleep(delay.min(timeout - elapsed));
        delay = (delay * 2).min(POLL_MAX);
    }
}

/// Trimmed text, cut to the last [`MAX_DETAIL_BYTES`] on a char boundary.
fn tail_detail(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= MAX_DETAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - MAX_DETAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

// ──────────────────── cloner ────────────────────

/// Runs one clone attempt and records exactly one audit event for it.
#[derive(Clone)]
pub struct RepoCloner {
    backend: Arc<dyn CloneBackend>,
    audit: AuditLog,
}

impl RepoCloner {
    pub fn new(backend: Arc<dyn CloneBackend>, audit: AuditLog) -> Self {
        Self { backend, audit }
    }

    pub fn from_config(config: &CloneConfig, audit: AuditLog) -> Self {
        Self::new(Arc::new(CommandBackend::from_config(config)), audit)
    }

    /// Clone `target` into `local_dir`. `attempt` is 1-based.
    pub fn clone_repo(&self, target: &RepoTarget, local_dir: &Path, attempt: u32) -> CloneOutcome {
        let started = Instant::now();
        let result = self.backend.fetch(target.identifier(), local_dir);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (outcome, event) = match result {
            Ok(()) => (
                CloneOutcome::Success {
                    target: target.clone(),
                    local_dir: local_dir.to_path_buf(),
                    attempts: attempt,
                },
                AuditEvent::new(AuditStatus::Success, initiators::CLONE_REPO, target),
            ),
            Err(CloneError { kind, detail }) => {
                let event = AuditEvent::new(AuditStatus::Failure, initiators::CLONE_REPO, target)
                    .field("kind", kind.failure_kind())
                    .field("cause", kind.as_str());
                (
                    CloneOutcome::Failure {
                        target: target.clone(),
                        local_dir: local_dir.to_path_buf(),
                        kind,
                        detail: detail.clone(),
                        attempts: attempt,
                    },
                    event.error(detail),
                )
            }
        };

        self.audit.record(
            event
                .field("target_dir", local_dir.display())
                .field("attempt", attempt)
                .field("duration_ms", duration_ms),
        );
        outcome
    }
}

impl std::fmt::Debug for RepoCloner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoCloner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> RepoTarget {
        RepoTarget::new("https://github.com/org/repo", "@").unwrap()
    }

    #[test]
    fn placeholders_are_substituted_inside_arguments() {
        let backend = CommandBackend::new(
            "git",
            vec![
                "clone".to_string(),
                "--depth=1".to_string(),
                "{url}".to_string(),
                "dest={dest}".to_string(),
            ],
            Duration::from_secs(1),
        );
        let args = backend.render_args("https://x/org/repo", Path::new("/m/org@repo"));
        assert_eq!(
            args,
            vec!["clone", "--depth=1", "https://x/org/repo", "dest=/m/org@repo"]
        );
    }

    #[test]
    fn detail_keeps_the_tail() {
        let long = format!("{}fatal: not found", "x".repeat(10_000));
        let detail = tail_detail(&long);
        assert!(detail.ends_with("fatal: not found"));
        assert!(detail.len() <= MAX_DETAIL_BYTES + 3);
        assert_eq!(tail_detail("  short \n"), "short");
    }

    #[test]
    fn missing_program_is_a_spawn_failure() {
        let (log, sink) = AuditLog::in_memory();
        let backend = CommandBackend::new(
            "rmine-definitely-not-a-real-program",
            vec![],
            Duration::from_secs(1),
        );
        let cloner = RepoCloner::new(Arc::new(backend), log);
        let dir = tempfile::tempdir().unwrap();

        let outcome = cloner.clone_repo(&target(), &dir.path().join("org@repo"), 1);
        assert!(matches!(
            outcome,
            CloneOutcome::Failure {
                kind: CloneFailureKind::Spawn,
                ..
            }
        ));
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, AuditStatus::Failure);
        assert_eq!(events[0].get("kind"), Some("external_process"));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_captures_stderr() {
        let (log, sink) = AuditLog::in_memory();
        let backend = CommandBackend::new(
            "sh",
            vec!["-c".to_string(), "echo 'fatal: {url} gone' >&2; exit 128".to_string()],
            Duration::from_secs(10),
        );
        let cloner = RepoCloner::new(Arc::new(backend), log);
        let dir = tempfile::tempdir().unwrap();

        let outcome = cloner.clone_repo(&target(), &dir.path().join("org@repo"), 2);
        match outcome {
            CloneOutcome::Failure {
                kind,
                detail,
                attempts,
                ..
            } => {
                assert_eq!(kind, CloneFailureKind::NonZeroExit);
                assert!(detail.contains("fatal: https://github.com/org/repo gone"));
                assert_eq!(attempts, 2);
            }
            CloneOutcome::Success { .. } => panic!("expected failure"),
        }
        assert_eq!(sink.events()[0].get("attempt"), Some("2"));
    }

    #[cfg(unix)]
    #[test]
    fn success_creates_the_destination() {
        let (log, sink) = AuditLog::in_memory();
        let backend = CommandBackend::new(
            "sh",
            vec![
                "-c".to_string(),
                "mkdir -p \"$1\" && touch \"$1/main.py\"".to_string(),
                "fake-git".to_string(),
                "{dest}".to_string(),
            ],
            Duration::from_secs(10),
        );
        let cloner = RepoCloner::new(Arc::new(backend), log);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("org@repo");

        let outcome = cloner.clone_repo(&target(), &dest, 1);
        assert!(outcome.is_success());
        assert!(dest.join("main.py").exists());
        let event = &sink.events()[0];
        assert_eq!(event.status, AuditStatus::Success);
        assert_eq!(event.get("target_dir"), Some(dest.to_string_lossy().as_ref()));
    }

    #[cfg(unix)]
    #[test]
    fn lingering_grandchild_does_not_extend_the_timeout() {
        let backend = CommandBackend::new(
            "sh",
            vec![
                "-c".to_string(),
                "sleep 8 & echo 'fatal: boom' >&2; exit 1".to_string(),
            ],
            Duration::from_secs(1),
        );
        let dir = tempfile::tempdir().unwrap();

        let started = Instant::now();
        let err = backend
            .fetch("https://github.com/org/repo", &dir.path().join("org@repo"))
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(err.kind, CloneFailureKind::NonZeroExit);
        assert!(err.detail.contains("fatal: boom"), "detail: {}", err.detail);
    }

    #[cfg(unix)]
    #[test]
    fn hung_client_is_killed_at_timeout() {
        let (log, _) = AuditLog::in_memory();
        let backend = CommandBackend::new(
            "sleep",
            vec!["30".to_string()],
            Duration::from_millis(200),
        );
        let cloner = RepoCloner::new(Arc::new(backend), log);
        let dir = tempfile::tempdir().unwrap();

        let started = Instant::now();
        let outcome = cloner.clone_repo(&target(), &dir.path().join("org@repo"), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
        match outcome {
            CloneOutcome::Failure { kind, detail, .. } => {
                assert_eq!(kind, CloneFailureKind::Timeout);
                assert!(detail.contains("within 200ms"), "detail: {detail}");
            }
            CloneOutcome::Success { .. } => panic!("expected timeout"),
        }
    }
}
