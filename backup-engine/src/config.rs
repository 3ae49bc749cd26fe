//! Configuration management for the backup engine.
//!
//! Loads configuration from a TOML file. Retention values here are defaults;
//! the `settings` table can override them at run time.

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the file tree being backed up
    pub content_root: PathBuf,

    /// Directory holding one output directory per backup run
    pub backup_root: PathBuf,

    /// SQLite database being exported
    pub source_database: PathBuf,

    /// Engine bookkeeping: job state, progress, locks, catalog, settings
    pub state_database: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Wall-clock budget of a single batch
    #[serde(default = "default_time_budget_ms")]
    pub time_budget_ms: u64,

    /// Rows fetched per database page
    #[serde(default = "default_batch_rows")]
    pub batch_rows: usize,

    /// Roll-over threshold of a database dump chunk
    #[serde(default = "default_chunk_bytes")]
    pub sql_chunk_bytes: u64,

    /// Roll-over threshold of an archive chunk
    #[serde(default = "default_chunk_bytes")]
    pub archive_chunk_bytes: u64,

    /// Files archived per stage call at most
    #[serde(default = "default_files_per_call")]
    pub files_per_call: usize,

    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Minimum spacing between unforced progress writes
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Path substrings; any file whose path contains one is skipped
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Directory names never descended into (VCS, build output, caches)
    #[serde(default = "default_excluded_dir_names")]
    pub excluded_dir_names: Vec<String>,

    /// Working directories of other backup tools living in the same tree
    #[serde(default = "default_sibling_tool_dirs")]
    pub sibling_tool_dirs: Vec<String>,

    #[serde(default)]
    pub follow_links: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Completed, unlocked backups kept after pruning
    #[serde(default = "default_keep")]
    pub keep: usize,

    #[serde(default = "default_incremental_enabled")]
    pub incremental_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_time_budget_ms() -> u64 {
    5_000
}

fn default_batch_rows() -> usize {
    500
}

fn default_chunk_bytes() -> u64 {
    50 * 1024 * 1024 // 50MB
}

fn default_files_per_call() -> usize {
    500
}

fn default_lock_ttl_secs() -> u64 {
    60
}

fn default_progress_interval_ms() -> u64 {
    500
}

fn default_excluded_dir_names() -> Vec<String> {
    [".git", ".svn", ".hg", "node_modules", ".cache", "__pycache__", ".idea"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_sibling_tool_dirs() -> Vec<String> {
    ["updraft", "ai1wm-backups", "backwpup-temp", "wpvivid_backups", "backups-dup-lite"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_keep() -> usize {
    5
}

fn default_incremental_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            time_budget_ms: default_time_budget_ms(),
            batch_rows: default_batch_rows(),
            sql_chunk_bytes: default_chunk_bytes(),
            archive_chunk_bytes: default_chunk_bytes(),
            files_per_call: default_files_per_call(),
            lock_ttl_secs: default_lock_ttl_secs(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: Vec::new(),
            excluded_dir_names: default_excluded_dir_names(),
            sibling_tool_dirs: default_sibling_tool_dirs(),
            follow_links: false,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep: default_keep(),
            incremental_enabled: default_incremental_enabled(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LimitsConfig {
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration with default limits for the given locations
    pub fn new(
        content_root: impl Into<PathBuf>,
        backup_root: impl Into<PathBuf>,
        source_database: impl Into<PathBuf>,
        state_database: impl Into<PathBuf>,
    ) -> Self {
        Config {
            paths: PathsConfig {
                content_root: content_root.into(),
                backup_root: backup_root.into(),
                source_database: source_database.into(),
                state_database: state_database.into(),
            },
            limits: LimitsConfig::default(),
            scan: ScanConfig::default(),
            retention: RetentionConfig::default(),
            log: LogConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.limits.batch_rows == 0 {
            return Err(EngineError::Config("limits.batch_rows must be positive".into()));
        }
        if self.limits.files_per_call == 0 {
            return Err(EngineError::Config("limits.files_per_call must be positive".into()));
        }
        if self.limits.sql_chunk_bytes == 0 || self.limits.archive_chunk_bytes == 0 {
            return Err(EngineError::Config("chunk thresholds must be positive".into()));
        }
        if self.paths.backup_root == self.paths.content_root {
            return Err(EngineError::Config(
                "paths.backup_root must not be the content root itself".into(),
            ));
        }
        Ok(())
    }
}
