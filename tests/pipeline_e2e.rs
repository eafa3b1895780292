//! End-to-end pipeline scenarios through the library API: clone with a
//! copying clone program, retention filter, list delete, and usage stats.

#![cfg(unix)]

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use ml_repo_miner::core::config::Config;
use ml_repo_miner::core::signals::ShutdownFlag;
use ml_repo_miner::logger::{AuditEvent, AuditLog, AuditStatus, initiators};
use ml_repo_miner::mining::orchestrator::{CloneDriver, ListDeleteDriver};
use ml_repo_miner::mining::stats::{StatsAggregator, write_stats_csv};
use ml_repo_miner::mining::usage::UsageScanner;

struct Fixture {
    _dir: tempfile::TempDir,
    sources: PathBuf,
    mining_root: PathBuf,
    config: Config,
}

/// Source trees:
/// - `alpha/ml`: 2 of 3 files are Python, 2 signature lines
/// - `beta/docs`: 1 of 5 files is Python
/// - `gamma/empty`: no files
fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let sources = dir.path().join("src");
    common::write_file(&sources, "alpha/ml/train.py", "import torch\nx = 1\n");
    common::write_file(&sources, "alpha/ml/pkg/fit.py", "from sklearn import svm\n");
    common::write_file(&sources, "alpha/ml/README.md", "readme\n");
    common::write_file(&sources, "beta/docs/conf.py", "import keras\n");
    for i in 0..4 {
        common::write_file(&sources, &format!("beta/docs/page{i}.md"), "page\n");
    }
    fs::create_dir_all(sources.join("gamma/empty")).unwrap();

    let mining_root = dir.path().join("mined");
    let mut config = Config::default();
    config.paths.mining_root.clone_from(&mining_root);
    config.clone.program = "sh".to_string();
    config.clone.args = vec![
        "-c".to_string(),
        r#"cp -R "$1" "$2""#.to_string(),
        "copy-clone".to_string(),
        "{url}".to_string(),
        "{dest}".to_string(),
    ];
    config.clone.timeout_secs = 30;
    config.clone.parallelism = 2;
    config.clone.batch_size = 2;
    config.validate().unwrap();

    Fixture {
        _dir: dir,
        sources,
        mining_root,
        config,
    }
}

fn source(fx: &Fixture, rel: &str) -> String {
    fx.sources.join(rel).to_string_lossy().into_owned()
}

fn events_for<'a>(events: &'a [AuditEvent], initiator: &str) -> Vec<&'a AuditEvent> {
    events.iter().filter(|e| e.initiator == initiator).collect()
}

fn dir_names(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn clone_run_keeps_only_python_dominated_repositories() {
    let fx = fixture();
    let (audit, memory) = AuditLog::in_memory();
    let driver = CloneDriver::from_config(&fx.config, audit, ShutdownFlag::new());

    let targets = vec![
        source(&fx, "alpha/ml"),
        source(&fx, "beta/docs"),
        source(&fx, "gamma/empty"),
        source(&fx, "delta/missing"),
    ];
    let summary = driver.run(&targets).unwrap();

    assert_eq!(summary.cloned, 1);
    assert_eq!(summary.deleted_low_proportion, 1);
    assert_eq!(summary.deleted_no_files, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(dir_names(&fx.mining_root), vec!["alpha@ml"]);

    let events = memory.events();
    let outcomes = events_for(&events, initiators::CLONE_REPOS);
    let status_of = |name: &str| {
        outcomes
            .iter()
            .find(|e| e.target.ends_with(name))
            .map(|e| e.status)
    };
    assert_eq!(status_of("alpha/ml"), Some(AuditStatus::Cloned));
    assert_eq!(status_of("beta/docs"), Some(AuditStatus::DeletedLowProportion));
    assert_eq!(status_of("gamma/empty"), Some(AuditStatus::DeletedNoFiles));
    assert_eq!(status_of("delta/missing"), Some(AuditStatus::Failure));

    let beta = outcomes
        .iter()
        .find(|e| e.target.ends_with("beta/docs"))
        .unwrap();
    assert_eq!(beta.get("proportion"), Some("0.2"));

    let deletes = events_for(&events, initiators::DELETE_REPO);
    assert_eq!(deletes.len(), 2);
    assert!(deletes.iter().all(|e| e.status == AuditStatus::Success));
    assert!(
        deletes
            .iter()
            .any(|e| e.get("type") == Some("LOW_PYTHON_0.2"))
    );

    let last = events.last().unwrap();
    assert_eq!(last.initiator, initiators::CLONE_REPOS);
    assert_eq!(last.status, AuditStatus::Success);
    assert_eq!(last.get("failed"), Some("1"));
}

#[test]
fn shutdown_before_run_skips_every_target() {
    let fx = fixture();
    let (audit, memory) = AuditLog::in_memory();
    let shutdown = ShutdownFlag::new();
    shutdown.request();
    let driver = CloneDriver::from_config(&fx.config, audit, shutdown);

    let summary = driver
        .run(&[source(&fx, "alpha/ml"), source(&fx, "beta/docs")])
        .unwrap();

    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.total(), 2);
    assert!(dir_names(&fx.mining_root).is_empty());
    assert_eq!(memory.events().last().unwrap().status, AuditStatus::Skipped);
}

#[test]
fn stats_after_clone_counts_signature_lines() {
    let fx = fixture();
    let (audit, memory) = AuditLog::in_memory();
    CloneDriver::from_config(&fx.config, audit.clone(), ShutdownFlag::new())
        .run(&[source(&fx, "alpha/ml"), source(&fx, "beta/docs")])
        .unwrap();

    let scanner = UsageScanner::from_config(&fx.config.scan, audit.clone());
    let rows = StatsAggregator::new(scanner, audit)
        .collect(&fx.mining_root)
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].path, fx.mining_root.join("alpha@ml"));
    assert_eq!(rows[0].usage_count, 2);
    assert!(rows[0].complete);

    let csv = fx.mining_root.with_file_name("stats.csv");
    write_stats_csv(&csv, &rows).unwrap();
    let written = fs::read_to_string(&csv).unwrap();
    let mut lines = written.lines();
    assert_eq!(lines.next(), Some("REPO,LIB_COUNT"));
    assert!(lines.next().unwrap().ends_with("alpha@ml,2"));

    let stats = events_for(&memory.events(), initiators::ML_STATS)
        .into_iter()
        .cloned()
        .collect::<Vec<_>>();
    assert!(stats.iter().any(|e| e.get("ml_lib_cnt") == Some("2")));
}

#[test]
fn list_delete_removes_named_directories() {
    let fx = fixture();
    let (audit, memory) = AuditLog::in_memory();
    CloneDriver::from_config(&fx.config, audit.clone(), ShutdownFlag::new())
        .run(&[source(&fx, "alpha/ml")])
        .unwrap();
    let kept = fx.mining_root.join("alpha@ml");
    assert!(kept.is_dir());

    let list = common::write_file(
        fx.mining_root.parent().unwrap(),
        "candidates.csv",
        &format!(
            "REPO,NOTE\n{},dup\n{},again\n{},never cloned\n",
            kept.display(),
            kept.display(),
            fx.mining_root.join("nobody@nothing").display()
        ),
    );
    let summary = ListDeleteDriver::from_config(&fx.config, audit, ShutdownFlag::new())
        .run(&list)
        .unwrap();

    assert_eq!(summary.removed, 1);
    assert_eq!(summary.not_found, 1);
    assert_eq!(summary.failed, 0);
    assert!(!kept.exists());

    let events = memory.events();
    let deletes = events_for(&events, initiators::DELETE_REPO);
    assert!(deletes.iter().any(|e| e.status == AuditStatus::NotFound));
    assert_eq!(
        events_for(&events, initiators::DELETE_REPOS).last().unwrap().status,
        AuditStatus::Success
    );
}
