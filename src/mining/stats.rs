//! Usage statistics across every repository under a mining root.

#![allow(missing_docs)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::errors::{FailureKind, MinerError, Result};
use crate::logger::audit::{AuditEvent, AuditStatus, initiators};
use crate::logger::sink::AuditLog;
use crate::mining::usage::UsageScanner;

/// Usage count for one repository directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoUsage {
    pub path: PathBuf,
    pub usage_count: u64,
    /// False when the scan could not visit the whole tree; the count is partial.
    pub complete: bool,
}

/// Runs the usage scanner over each immediate subdirectory of a root.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    scanner: UsageScanner,
    audit: AuditLog,
}

impl StatsAggregator {
    pub fn new(scanner: UsageScanner, audit: AuditLog) -> Self {
        Self { scanner, audit }
    }

    /// Scan every repository under `root`, in path order.
    ///
    /// A repository whose scan fails stays in the result with its partial
    /// count and `complete == false`. Only failure to list `root` is an error.
    pub fn collect(&self, root: &Path) -> Result<Vec<RepoUsage>> {
        let repos = match list_repositories(root) {
            Ok(repos) => repos,
            Err(err) => {
                self.audit.record(
                    AuditEvent::new(AuditStatus::Failure, initiators::ML_STATS, root.display())
                        .field("kind", FailureKind::from_io(&err))
                        .error(&err),
                );
                return Err(MinerError::io(root, err));
            }
        };

        self.audit.record(
            AuditEvent::new(AuditStatus::Start, initiators::ML_STATS, root.display())
                .field("repo_count", repos.len()),
        );

        let mut results = Vec::with_capacity(repos.len());
        for repo in repos {
            let report = self.scanner.scan(&repo);
            let status = if report.complete {
                AuditStatus::Success
            } else {
                AuditStatus::Failure
            };
            let mut event = AuditEvent::new(status, initiators::ML_STATS, repo.display())
                .field("ml_lib_cnt", report.usage_count);
            if !report.complete {
                event = event.error("scan incomplete; count is partial");
            }
            self.audit.record(event);

            results.push(RepoUsage {
                path: repo,
                usage_count: report.usage_count,
                complete: report.complete,
            });
        }
        Ok(results)
    }
}

/// Immediate subdirectories of `root`, sorted. Files and symlinks are skipped.
fn list_repositories(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut repos = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            repos.push(entry.path());
        }
    }
    repos.sort();
    Ok(repos)
}

/// Write `REPO,LIB_COUNT` rows.
pub fn write_stats_csv(path: &Path, rows: &[RepoUsage]) -> Result<()> {
    let mut out = String::from("REPO,LIB_COUNT\n");
    for row in rows {
        out.push_str(&csv_field(&row.path.to_string_lossy()));
        out.push(',');
        out.push_str(&row.usage_count.to_string());
        out.push('\n');
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| MinerError::io(parent, e))?;
    }
    let mut file = fs::File::create(path).map_err(|e| MinerError::io(path, e))?;
    file.write_all(out.as_bytes())
        .map_err(|e| MinerError::io(path, e))
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::signatures::SignatureSet;

    fn aggregator() -> (StatsAggregator, std::sync::Arc<crate::logger::sink::MemorySink>) {
        let (log, sink) = AuditLog::in_memory();
        let scanner = UsageScanner::new(SignatureSet::defaults(), ".py", log.clone());
        (StatsAggregator::new(scanner, log), sink)
    }

    #[test]
    fn collects_each_repo_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b@two")).unwrap();
        fs::create_dir_all(root.join("a@one/pkg")).unwrap();
        fs::write(root.join("a@one/pkg/train.py"), "import torch\nimport keras\n").unwrap();
        fs::write(root.join("b@two/app.py"), "print(1)\n").unwrap();
        fs::write(root.join("stray.py"), "import torch\n").unwrap();
        let (stats, sink) = aggregator();

        let rows = stats.collect(root).unwrap();
        let counts: Vec<(String, u64)> = rows
            .iter()
            .map(|r| (r.path.file_name().unwrap().to_string_lossy().into_owned(), r.usage_count))
            .collect();
        assert_eq!(counts, vec![("a@one".to_string(), 2), ("b@two".to_string(), 0)]);
        assert!(rows.iter().all(|r| r.complete));

        let events = sink.events();
        assert_eq!(events[0].status, AuditStatus::Start);
        assert_eq!(events[0].get("repo_count"), Some("2"));
        let per_repo: Vec<_> = events
            .iter()
            .filter(|e| e.initiator == "ml_stats" && e.status == AuditStatus::Success)
            .collect();
        assert_eq!(per_repo.len(), 2);
        assert_eq!(per_repo[0].get("ml_lib_cnt"), Some("2"));
    }

    #[test]
    fn missing_root_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let (stats, sink) = aggregator();
        let err = stats.collect(&dir.path().join("absent")).unwrap_err();
        assert_eq!(err.code(), "RMN-3001");
        assert_eq!(sink.events()[0].status, AuditStatus::Failure);
    }

    #[test]
    fn csv_has_header_and_quotes_commas() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out/stats.csv");
        let rows = vec![
            RepoUsage {
                path: PathBuf::from("/m/a@one"),
                usage_count: 3,
                complete: true,
            },
            RepoUsage {
                path: PathBuf::from("/m/odd,name"),
                usage_count: 0,
                complete: false,
            },
        ];
        write_stats_csv(&out, &rows).unwrap();
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            "REPO,LIB_COUNT\n/m/a@one,3\n\"/m/odd,name\",0\n"
        );
    }
}
