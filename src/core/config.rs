//! Configuration system: TOML file + env var overrides + defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{MinerError, Result};
use crate::core::target::DEFAULT_DIR_SEPARATOR;
use crate::logger::audit::AuditTimezone;
use crate::mining::signatures::DEFAULT_SIGNATURES;

/// Placeholder replaced by the remote identifier in clone arguments.
pub const URL_PLACEHOLDER: &str = "{url}";
/// Placeholder replaced by the local destination in clone arguments.
pub const DEST_PLACEHOLDER: &str = "{dest}";

/// Full miner configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub clone: CloneConfig,
    pub retention: RetentionConfig,
    pub scan: ScanConfig,
    pub audit: AuditConfig,
    pub input: InputConfig,
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// Directory that receives one subdirectory per cloned repository.
    pub mining_root: PathBuf,
}

/// External VCS client invocation, batching, retry and parallelism.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CloneConfig {
    pub program: String,
    /// Argument template; `{url}` and `{dest}` are substituted per call.
    pub args: Vec<String>,
    pub timeout_secs: u64,
    /// Total attempts per target (1 = no retry).
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Concurrent clone workers (1 = strictly sequential).
    pub parallelism: usize,
    pub batch_size: usize,
    pub dir_separator: String,
}

/// Keep/delete policy applied after each clone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    /// Minimum language-file proportion for a repository to be kept.
    pub threshold: f64,
    /// Decimal places of the proportion recorded in the deletion tag.
    pub precision: u32,
    pub extension: String,
    /// Label used in the low-proportion deletion tag (`LOW_<label>_<p>`).
    pub language_label: String,
}

/// ML framework usage scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    pub extension: String,
    pub signatures: Vec<String>,
    /// Appended to `signatures`; lets a config extend the defaults without
    /// restating them.
    pub extra_signatures: Vec<String>,
}

/// Forensics audit trail output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuditConfig {
    pub log_path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Optional JSONL mirror of every audit event.
    pub jsonl_path: Option<PathBuf>,
    /// `UTC`, `local`, or a fixed offset such as `+02:00`.
    pub timezone: String,
    /// Also print every audit line on stderr.
    pub echo_stderr: bool,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

/// Delimited input lists (repository URLs, deletion candidates).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InputConfig {
    pub url_column: String,
    pub candidate_column: String,
    pub delimiter: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = home_dir();
        let data = home_dir.join(".local").join("share").join("rmine");
        Self {
            config_file: home_dir.join(".config").join("rmine").join("config.toml"),
            mining_root: data.join("repos"),
        }
    }
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
            args: vec![
                "clone".to_string(),
                URL_PLACEHOLDER.to_string(),
                DEST_PLACEHOLDER.to_string(),
            ],
            timeout_secs: 15 * 60,
            max_attempts: 1,
            backoff_base_ms: 2_000,
            backoff_max_ms: 60_000,
            parallelism: 1,
            batch_size: 100,
            dir_separator: DEFAULT_DIR_SEPARATOR.to_string(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.25,
            precision: 5,
            extension: ".py".to_string(),
            language_label: "PYTHON".to_string(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extension: ".py".to_string(),
            signatures: DEFAULT_SIGNATURES.iter().map(ToString::to_string).collect(),
            extra_signatures: Vec::new(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        let data = home_dir().join(".local").join("share").join("rmine");
        Self {
            log_path: data.join("forensics.log"),
            fallback_path: Some(std::env::temp_dir().join("rmine-forensics.log")),
            jsonl_path: None,
            timezone: "UTC".to_string(),
            echo_stderr: false,
            max_size_bytes: 100 * 1024 * 1024,
            max_rotated_files: 5,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            url_column: "URL".to_string(),
            candidate_column: "REPO".to_string(),
            delimiter: ",".to_string(),
        }
    }
}

impl ScanConfig {
    /// Built-in plus extra signatures, in declaration order.
    pub fn all_signatures(&self) -> impl Iterator<Item = &str> {
        self.signatures
            .iter()
            .chain(&self.extra_signatures)
            .map(String::as_str)
    }
}

impl InputConfig {
    /// The delimiter as a single byte. Validation guarantees one ASCII char.
    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter.as_bytes().first().copied().unwrap_or(b',')
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| MinerError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(MinerError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config, recorded with each run.
    ///
    /// FNV-1a over the canonical JSON form so the value is stable across
    /// processes and toolchains.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Parsed audit timezone. Validation guarantees this succeeds for loaded configs.
    pub fn audit_timezone(&self) -> Result<AuditTimezone> {
        AuditTimezone::parse(&self.audit.timezone).ok_or_else(|| MinerError::InvalidConfig {
            details: format!(
                "audit.timezone must be UTC, local, or +HH:MM/-HH:MM; got {:?}",
                self.audit.timezone
            ),
        })
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("RMINE_MINING_ROOT") {
            self.paths.mining_root = PathBuf::from(raw);
        }

        if let Some(raw) = lookup("RMINE_CLONE_PROGRAM") {
            self.clone.program = raw;
        }
        if let Some(raw) = lookup("RMINE_CLONE_TIMEOUT_SECS") {
            self.clone.timeout_secs = parse_env("RMINE_CLONE_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("RMINE_CLONE_MAX_ATTEMPTS") {
            self.clone.max_attempts = parse_env("RMINE_CLONE_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("RMINE_CLONE_PARALLELISM") {
            self.clone.parallelism = parse_env("RMINE_CLONE_PARALLELISM", &raw)?;
        }
        if let Some(raw) = lookup("RMINE_CLONE_BATCH_SIZE") {
            self.clone.batch_size = parse_env("RMINE_CLONE_BATCH_SIZE", &raw)?;
        }

        if let Some(raw) = lookup("RMINE_RETENTION_THRESHOLD") {
            self.retention.threshold = parse_env("RMINE_RETENTION_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("RMINE_RETENTION_PRECISION") {
            self.retention.precision = parse_env("RMINE_RETENTION_PRECISION", &raw)?;
        }

        if let Some(raw) = lookup("RMINE_AUDIT_LOG") {
            self.audit.log_path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("RMINE_AUDIT_JSONL") {
            self.audit.jsonl_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("RMINE_AUDIT_TIMEZONE") {
            self.audit.timezone = raw;
        }
        if let Some(raw) = lookup("RMINE_AUDIT_ECHO_STDERR") {
            self.audit.echo_stderr = parse_env("RMINE_AUDIT_ECHO_STDERR", &raw)?;
        }

        Ok(())
    }

    fn normalize(&mut self) {
        // Signatures are matched against lowercased lines.
        for sig in self
            .scan
            .signatures
            .iter_mut()
            .chain(self.scan.extra_signatures.iter_mut())
        {
            *sig = sig.to_ascii_lowercase();
        }

        let stripped = {
            let root = self.paths.mining_root.to_string_lossy();
            (root.len() > 1)
                .then(|| root.strip_suffix('/').map(PathBuf::from))
                .flatten()
        };
        if let Some(stripped) = stripped {
            self.paths.mining_root = stripped;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |details: String| Err(MinerError::InvalidConfig { details });

        if self.clone.program.trim().is_empty() {
            return invalid("clone.program must not be empty".to_string());
        }
        for placeholder in [URL_PLACEHOLDER, DEST_PLACEHOLDER] {
            if !self.clone.args.iter().any(|a| a.contains(placeholder)) {
                return invalid(format!("clone.args must reference {placeholder}"));
            }
        }
        if self.clone.timeout_secs == 0 {
            return invalid("clone.timeout_secs must be >= 1".to_string());
        }
        if self.clone.max_attempts == 0 {
            return invalid("clone.max_attempts must be >= 1".to_string());
        }
        if self.clone.parallelism == 0 {
            return invalid("clone.parallelism must be >= 1".to_string());
        }
        if self.clone.batch_size == 0 {
            return invalid("clone.batch_size must be >= 1".to_string());
        }
        if self.clone.backoff_base_ms > self.clone.backoff_max_ms {
            return invalid(format!(
                "clone.backoff_base_ms ({}) must be <= clone.backoff_max_ms ({})",
                self.clone.backoff_base_ms, self.clone.backoff_max_ms
            ));
        }
        if self.clone.dir_separator.is_empty() || self.clone.dir_separator.contains('/') {
            return invalid("clone.dir_separator must be non-empty and must not contain '/'".into());
        }

        if !(0.0..=1.0).contains(&self.retention.threshold) {
            return invalid(format!(
                "retention.threshold must be in [0,1], got {}",
                self.retention.threshold
            ));
        }
        if self.retention.precision > 12 {
            return invalid(format!(
                "retention.precision must be <= 12, got {}",
                self.retention.precision
            ));
        }
        if self.retention.extension.is_empty() || self.scan.extension.is_empty() {
            return invalid("retention.extension and scan.extension must be non-empty".into());
        }

        let mut any_signature = false;
        for sig in self.scan.all_signatures() {
            any_signature = true;
            if sig.is_empty() || !sig.is_ascii() {
                return invalid(format!(
                    "scan signatures must be non-empty ASCII, got {sig:?}"
                ));
            }
        }
        if !any_signature {
            return invalid("scan.signatures must contain at least one entry".to_string());
        }

        self.audit_timezone()?;
        if self.audit.max_size_bytes == 0 || self.audit.max_rotated_files == 0 {
            return invalid("audit.max_size_bytes and audit.max_rotated_files must be > 0".into());
        }

        if self.input.delimiter.len() != 1 || !self.input.delimiter.is_ascii() {
            return invalid(format!(
                "input.delimiter must be a single ASCII character, got {:?}",
                self.input.delimiter
            ));
        }
        if self.input.url_column.is_empty() || self.input.candidate_column.is_empty() {
            return invalid("input column names must be non-empty".to_string());
        }

        Ok(())
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[RMINE-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| MinerError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

#[cfg(test)]
mod tests {
    use super::{Config, MinerError};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    fn assert_invalid(cfg: &Config, needle: &str) {
        let err = cfg.validate().expect_err("expected validation error");
        match err {
            MinerError::InvalidConfig { details } => {
                assert!(details.contains(needle), "{details} should mention {needle}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert!((cfg.retention.threshold - 0.25).abs() < f64::EPSILON);
        assert_eq!(cfg.retention.precision, 5);
        assert_eq!(cfg.clone.batch_size, 100);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let mut cfg = Config::default();
        cfg.clone.batch_size = 0;
        assert_invalid(&cfg, "batch_size");
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut cfg = Config::default();
        cfg.clone.timeout_secs = 0;
        assert_invalid(&cfg, "timeout_secs");
    }

    #[test]
    fn threshold_outside_unit_interval_rejected() {
        let mut cfg = Config::default();
        cfg.retention.threshold = 1.5;
        assert_invalid(&cfg, "threshold");
    }

    #[test]
    fn clone_args_must_reference_placeholders() {
        let mut cfg = Config::default();
        cfg.clone.args = vec!["clone".to_string(), "{url}".to_string()];
        assert_invalid(&cfg, "{dest}");
    }

    #[test]
    fn non_ascii_signature_rejected() {
        let mut cfg = Config::default();
        cfg.scan.extra_signatures.push("тензор".to_string());
        assert_invalid(&cfg, "ASCII");
    }

    #[test]
    fn empty_signature_set_rejected() {
        let mut cfg = Config::default();
        cfg.scan.signatures.clear();
        assert_invalid(&cfg, "at least one");
    }

    #[test]
    fn bad_timezone_rejected() {
        let mut cfg = Config::default();
        cfg.audit.timezone = "Mars/Olympus".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn multi_char_delimiter_rejected() {
        let mut cfg = Config::default();
        cfg.input.delimiter = "::".to_string();
        assert_invalid(&cfg, "delimiter");
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().expect("hash should compute");
        let mut modified = Config::default();
        modified.retention.threshold = 0.3;
        let after = modified.stable_hash().expect("hash should compute");
        assert_ne!(before, after);
        assert_eq!(before, Config::default().stable_hash().unwrap());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("RMINE_MINING_ROOT", "/srv/mining"),
            ("RMINE_CLONE_PARALLELISM", "4"),
            ("RMINE_RETENTION_THRESHOLD", "0.5"),
            ("RMINE_AUDIT_TIMEZONE", "+05:30"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides should parse");

        assert_eq!(cfg.paths.mining_root, PathBuf::from("/srv/mining"));
        assert_eq!(cfg.clone.parallelism, 4);
        assert!((cfg.retention.threshold - 0.5).abs() < f64::EPSILON);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_override_parse_failure_is_reported() {
        let mut cfg = Config::default();
        let overrides = vars(&[("RMINE_CLONE_BATCH_SIZE", "many")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("expected parse failure");
        assert_eq!(err.code(), "RMN-1003");
        assert!(err.to_string().contains("RMINE_CLONE_BATCH_SIZE"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let raw = r#"
            [retention]
            threshold = 0.4

            [scan]
            extra_signatures = ["JAX", "flax."]
        "#;
        let mut cfg: Config = toml::from_str(raw).unwrap();
        cfg.normalize();
        assert!((cfg.retention.threshold - 0.4).abs() < f64::EPSILON);
        assert_eq!(cfg.retention.precision, 5);
        assert_eq!(cfg.clone.program, "git");
        assert!(cfg.scan.all_signatures().any(|s| s == "jax"));
        assert!(cfg.scan.all_signatures().any(|s| s == "sklearn"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert_eq!(err.code(), "RMN-1002");
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rmine.toml");
        std::fs::write(
            &path,
            "[paths]\nmining_root = \"/data/repos/\"\n[clone]\nbatch_size = 25\n",
        )
        .unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.clone.batch_size, 25);
        assert_eq!(cfg.paths.config_file, path);
    }
}
