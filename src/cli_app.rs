//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use ml_repo_miner::core::config::Config;
use ml_repo_miner::core::errors::MinerError;
use ml_repo_miner::core::signals::ShutdownFlag;
use ml_repo_miner::logger::sink::AuditLog;
use ml_repo_miner::mining::candidates::read_unique_column;
use ml_repo_miner::mining::orchestrator::{
    CloneDriver, CloneRunSummary, DeleteRunSummary, ListDeleteDriver,
};
use ml_repo_miner::mining::stats::{RepoUsage, StatsAggregator, write_stats_csv};
use ml_repo_miner::mining::usage::UsageScanner;

/// Bulk repository miner with a forensic audit trail.
#[derive(Debug, Parser)]
#[command(
    name = "rmine",
    author,
    version,
    about = "Repository miner - clone, filter, and measure ML framework usage",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Override the forensics log path.
    #[arg(long, global = true, value_name = "PATH")]
    audit_log: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Echo every audit line on stderr.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Clone repositories and keep the Python-dominated ones.
    Clone(CloneArgs),
    /// Delete every directory named in a candidate list.
    Delete(DeleteArgs),
    /// Count ML framework usage in one repository.
    Scan(ScanArgs),
    /// Count ML framework usage across every repository in the mining root.
    Stats(StatsArgs),
    /// View and update configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
#[command(group(
    ArgGroup::new("clone_source")
        .required(true)
        .args(["input", "urls"])
))]
struct CloneArgs {
    /// Delimited file listing repository URLs.
    #[arg(long, short, value_name = "PATH", conflicts_with = "urls")]
    input: Option<PathBuf>,
    /// Column holding the URLs (defaults to `input.url_column`).
    #[arg(long, value_name = "NAME", requires = "input")]
    column: Option<String>,
    /// Repository URLs given directly.
    #[arg(value_name = "URL")]
    urls: Vec<String>,
    /// Directory that receives the clones.
    #[arg(long, value_name = "DIR")]
    mining_root: Option<PathBuf>,
    /// Targets per batch.
    #[arg(long, value_name = "N")]
    batch_size: Option<usize>,
    /// Concurrent clone workers.
    #[arg(long, short = 'j', value_name = "N")]
    parallelism: Option<usize>,
    /// Attempts per target for transient failures.
    #[arg(long, value_name = "N")]
    max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Args)]
struct DeleteArgs {
    /// Delimited file listing directories to delete.
    #[arg(value_name = "LIST")]
    list: PathBuf,
    /// Column holding the paths (defaults to `input.candidate_column`).
    #[arg(long, value_name = "NAME")]
    column: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct ScanArgs {
    /// Repository directory to scan.
    #[arg(value_name = "DIR")]
    repo: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct StatsArgs {
    /// Mining root to aggregate (defaults to `paths.mining_root`).
    #[arg(value_name = "DIR")]
    root: Option<PathBuf>,
    /// Write `REPO,LIB_COUNT` rows to this CSV file.
    #[arg(long, short, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
    /// Show effective-vs-default config diff.
    Diff,
    /// Reset to generated defaults.
    Reset,
    /// Set a specific config key.
    Set(ConfigSetArgs),
}

#[derive(Debug, Clone, Args)]
struct ConfigSetArgs {
    /// Dot-path config key to set.
    key: String,
    /// New value to apply.
    value: String,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<MinerError> for CliError {
    fn from(err: MinerError) -> Self {
        match err {
            MinerError::InvalidConfig { .. }
            | MinerError::MissingConfig { .. }
            | MinerError::ConfigParse { .. }
            | MinerError::InvalidBatchSize { .. }
            | MinerError::InvalidTarget { .. }
            | MinerError::InputMalformed { .. } => Self::User(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Clone(args) => run_clone(cli, args),
        Command::Delete(args) => run_delete(cli, args),
        Command::Scan(args) => run_scan(cli, args),
        Command::Stats(args) => run_stats(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── shared setup ────────────────────

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(path) = &cli.audit_log {
        config.audit.log_path.clone_from(path);
    }
    if cli.verbose {
        config.audit.echo_stderr = true;
    }
    Ok(config)
}

fn open_audit(config: &Config) -> Result<AuditLog, CliError> {
    Ok(AuditLog::from_config(&config.audit)?)
}

// ──────────────────── clone ────────────────────

fn run_clone(cli: &Cli, args: &CloneArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    if let Some(root) = &args.mining_root {
        config.paths.mining_root.clone_from(root);
    }
    if let Some(n) = args.batch_size {
        config.clone.batch_size = n;
    }
    if let Some(n) = args.parallelism {
        config.clone.parallelism = n;
    }
    if let Some(n) = args.max_attempts {
        config.clone.max_attempts = n;
    }
    config.validate()?;

    let identifiers = match &args.input {
        Some(path) => {
            let column = args.column.as_deref().unwrap_or(&config.input.url_column);
            read_unique_column(path, column, config.input.delimiter_byte())?
        }
        None => {
            let mut urls = args.urls.clone();
            urls.sort();
            urls.dedup();
            urls
        }
    };

    let audit = open_audit(&config)?;
    let driver = CloneDriver::from_config(&config, audit, ShutdownFlag::with_os_signals());
    let summary = driver.run(&identifiers)?;

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                print_clone_summary(&summary, identifiers.len(), &config.paths.mining_root);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "clone",
                "targets": identifiers.len(),
                "mining_root": config.paths.mining_root.to_string_lossy(),
                "summary": serde_json::to_value(summary)?,
                "audit_log": config.audit.log_path.to_string_lossy(),
            });
            write_json_line(&payload)?;
        }
    }

    if summary.skipped > 0 {
        return Err(CliError::Partial(format!(
            "interrupted: {} of {} targets were not attempted",
            summary.skipped,
            summary.total()
        )));
    }
    Ok(())
}

fn print_clone_summary(summary: &CloneRunSummary, targets: usize, root: &Path) {
    println!("{} {targets} target(s) into {}", "Mined".bold(), root.display());
    println!("  {:<24} {}", "kept".green(), summary.cloned);
    println!("  {:<24} {}", "deleted (no files)", summary.deleted_no_files);
    println!(
        "  {:<24} {}",
        "deleted (low proportion)", summary.deleted_low_proportion
    );
    if summary.failed > 0 {
        println!("  {:<24} {}", "failed".red(), summary.failed);
    } else {
        println!("  {:<24} 0", "failed");
    }
    if summary.skipped > 0 {
        println!("  {:<24} {}", "skipped".yellow(), summary.skipped);
    }
}

// ──────────────────── delete ────────────────────

fn run_delete(cli: &Cli, args: &DeleteArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    if let Some(column) = &args.column {
        config.input.candidate_column.clone_from(column);
    }

    let audit = open_audit(&config)?;
    let driver = ListDeleteDriver::from_config(&config, audit, ShutdownFlag::with_os_signals());
    let summary = driver.run(&args.list)?;

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                print_delete_summary(&summary, &args.list);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "delete",
                "list": args.list.to_string_lossy(),
                "summary": serde_json::to_value(summary)?,
            });
            write_json_line(&payload)?;
        }
    }

    if summary.skipped > 0 {
        return Err(CliError::Partial(format!(
            "interrupted: {} candidate(s) were not attempted",
            summary.skipped
        )));
    }
    Ok(())
}

fn print_delete_summary(summary: &DeleteRunSummary, list: &Path) {
    println!("{} {}", "Processed".bold(), list.display());
    println!("  {:<12} {}", "removed".green(), summary.removed);
    println!("  {:<12} {}", "not found", summary.not_found);
    if summary.failed > 0 {
        println!("  {:<12} {}", "failed".red(), summary.failed);
    }
    if summary.skipped > 0 {
        println!("  {:<12} {}", "skipped".yellow(), summary.skipped);
    }
}

// ──────────────────── scan / stats ────────────────────

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let audit = open_audit(&config)?;
    let report = UsageScanner::from_config(&config.scan, audit.clone()).scan(&args.repo);
    audit.flush();

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                println!("{} {}", report.usage_count, args.repo.display());
                if !report.complete {
                    eprintln!("warning: scan incomplete; count is partial");
                }
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "scan",
                "repo": args.repo.to_string_lossy(),
                "usage_count": report.usage_count,
                "files_scanned": report.files_scanned,
                "files_failed": report.files_failed,
                "complete": report.complete,
            });
            write_json_line(&payload)?;
        }
    }

    if report.complete {
        Ok(())
    } else {
        Err(CliError::Partial(format!(
            "scan of {} was incomplete",
            args.repo.display()
        )))
    }
}

fn run_stats(cli: &Cli, args: &StatsArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let root = args
        .root
        .clone()
        .unwrap_or_else(|| config.paths.mining_root.clone());
    let audit = open_audit(&config)?;
    let aggregator = StatsAggregator::new(
        UsageScanner::from_config(&config.scan, audit.clone()),
        audit.clone(),
    );
    let rows = aggregator.collect(&root);
    audit.flush();
    let rows = rows?;

    if let Some(output) = &args.output {
        write_stats_csv(output, &rows)?;
    }

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                print_stats(&rows);
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "stats",
                "root": root.to_string_lossy(),
                "repos": serde_json::to_value(&rows)?,
                "output": args.output.as_ref().map(|p| p.to_string_lossy()),
            });
            write_json_line(&payload)?;
        }
    }

    let partial = rows.iter().filter(|r| !r.complete).count();
    if partial > 0 {
        return Err(CliError::Partial(format!(
            "{partial} repositor{} scanned incompletely",
            if partial == 1 { "y was" } else { "ies were" }
        )));
    }
    Ok(())
}

fn print_stats(rows: &[RepoUsage]) {
    if rows.is_empty() {
        println!("No repositories found.");
        return;
    }
    let total: u64 = rows.iter().map(|r| r.usage_count).sum();
    println!("{:>10}  {}", "LIB_COUNT".bold(), "REPO".bold());
    for row in rows {
        let marker = if row.complete { "" } else { " (partial)" };
        println!("{:>10}  {}{marker}", row.usage_count, row.path.display());
    }
    println!("{:>10}  {} repositories", total, rows.len());
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => eprintln!("Configuration is INVALID: {e}"),
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "code": e.code(),
                            "error": e.to_string(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
        Some(ConfigCommand::Diff) => {
            let effective = Config::load(cli.config.as_deref())?;
            let mut defaults = Config::default();
            // The source path always differs; it is not a setting.
            defaults.paths.config_file.clone_from(&effective.paths.config_file);
            let differs = effective != defaults;

            match output_mode(cli) {
                OutputMode::Human => {
                    if differs {
                        let eff_json = serde_json::to_value(&effective)?;
                        let def_json = serde_json::to_value(&defaults)?;
                        println!("--- defaults");
                        println!("+++ effective ({})", effective.paths.config_file.display());
                        println!();
                        print_json_diff("", &def_json, &eff_json);
                    } else {
                        println!("No differences from defaults.");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config diff",
                        "has_differences": differs,
                        "effective": serde_json::to_value(&effective)?,
                        "defaults": serde_json::to_value(&defaults)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Reset) => {
            let defaults = Config::default();
            let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CliError::Runtime(format!("create config dir: {e}")))?;
            }
            let toml_str = toml::to_string_pretty(&defaults)
                .map_err(|e| CliError::Runtime(format!("serialize default config: {e}")))?;
            std::fs::write(&config_path, &toml_str)
                .map_err(|e| CliError::Runtime(format!("write config: {e}")))?;

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("Reset config to defaults: {}", config_path.display());
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config reset",
                        "path": config_path.to_string_lossy(),
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Set(set_args)) => run_config_set(cli, set_args),
    }
}

fn run_config_set(cli: &Cli, set_args: &ConfigSetArgs) -> Result<(), CliError> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    let mut toml_value: toml::Value = if config_path.exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| CliError::Runtime(format!("read config: {e}")))?;
        toml::from_str(&raw).map_err(|e| CliError::Runtime(format!("parse config: {e}")))?
    } else {
        toml::Value::Table(toml::map::Map::new())
    };

    set_toml_value(&mut toml_value, &set_args.key, &set_args.value)?;

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CliError::Runtime(format!("create config dir: {e}")))?;
    }
    let toml_str = toml::to_string_pretty(&toml_value)
        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
    std::fs::write(&config_path, &toml_str)
        .map_err(|e| CliError::Runtime(format!("write config: {e}")))?;

    let validation = Config::load(Some(&config_path));
    match output_mode(cli) {
        OutputMode::Human => {
            println!(
                "Set {} = {} in {}",
                set_args.key,
                set_args.value,
                config_path.display()
            );
            if let Err(e) = &validation {
                eprintln!("Warning: resulting configuration is invalid: {e}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "config set",
                "key": set_args.key,
                "value": set_args.value,
                "path": config_path.to_string_lossy(),
                "valid": validation.is_ok(),
                "validation_error": validation.as_ref().err().map(ToString::to_string),
            });
            write_json_line(&payload)?;
        }
    }
    validation
        .map(|_| ())
        .map_err(|e| CliError::Partial(format!("value set but config invalid: {e}")))
}

/// Set a value in a TOML table using a dot-separated path.
fn set_toml_value(root: &mut toml::Value, dot_path: &str, raw_value: &str) -> Result<(), CliError> {
    let Some((parents, key)) = dot_path
        .rsplit_once('.')
        .map_or(Some(("", dot_path)), Some)
        .filter(|(_, key)| !key.is_empty())
    else {
        return Err(CliError::User("empty config key".to_string()));
    };

    let mut current = root;
    for part in parents.split('.').filter(|p| !p.is_empty()) {
        current = current
            .as_table_mut()
            .ok_or_else(|| CliError::User(format!("key path component is not a table: {part}")))?
            .entry(part)
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    let table = current
        .as_table_mut()
        .ok_or_else(|| CliError::User("parent is not a table".to_string()))?;
    table.insert(key.to_string(), parse_toml_value(raw_value));
    Ok(())
}

/// Parse a raw string into a TOML value, guessing the type.
fn parse_toml_value(raw: &str) -> toml::Value {
    if let Ok(b) = raw.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return toml::Value::Float(f);
    }
    toml::Value::String(raw.to_string())
}

/// Print a recursive diff of two JSON values.
fn print_json_diff(prefix: &str, default: &Value, effective: &Value) {
    match (default, effective) {
        (Value::Object(def_map), Value::Object(eff_map)) => {
            let mut all_keys: Vec<&String> = def_map.keys().chain(eff_map.keys()).collect();
            all_keys.sort();
            all_keys.dedup();

            for key in all_keys {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                match (def_map.get(key), eff_map.get(key)) {
                    (Some(d), Some(e)) if d != e => print_json_diff(&path, d, e),
                    (Some(d), None) => println!("- {path}: {d}"),
                    (None, Some(e)) => println!("+ {path}: {e}"),
                    _ => {}
                }
            }
        }
        _ => {
            if default != effective {
                println!("- {prefix}: {default}");
                println!("+ {prefix}: {effective}");
            }
        }
    }
}

// ──────────────────── output ────────────────────

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("RMINE_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
