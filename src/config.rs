// src/config.rs
//
// Loads `~/.config/repo-historian/config.toml` (or the path in `HISTORIAN_CONFIG`).
// A missing file means defaults.

use crate::error::{HistorianError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct HistorianConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    dirs::data_dir()
        .map(|d| {
            d.join("repo-historian")
                .join("historian.db")
                .to_string_lossy()
                .into_owned()
        })
        .unwrap_or_else(|| "historian.db".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Upper bound on commits walked per ingestion
    #[serde(default = "default_max_commits")]
    pub max_commits: usize,
}

fn default_max_commits() -> usize {
    1000
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_commits: default_max_commits(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotConfig {
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Files longer than this many characters are left out
    #[serde(default = "default_max_file_chars")]
    pub max_file_chars: usize,

    /// Fraction of non-printable bytes above which a file counts as binary
    #[serde(default = "default_binary_threshold")]
    pub binary_threshold: f64,
}

fn default_max_files() -> usize {
    50
}

fn default_max_file_chars() -> usize {
    100_000
}

fn default_binary_threshold() -> f64 {
    0.1
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_file_chars: default_max_file_chars(),
            binary_threshold: default_binary_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Cap on candidate commits per query, applied after filtering
    #[serde(default = "default_query_commit_cap")]
    pub query_commit_cap: usize,

    #[serde(default = "default_evolution_commits")]
    pub evolution_commits: usize,

    #[serde(default = "default_pattern_commits")]
    pub pattern_commits: usize,

    #[serde(default = "default_architecture_commits")]
    pub architecture_commits: usize,

    /// Per-file clip applied to snapshot contents in a payload
    #[serde(default = "default_max_excerpt_chars")]
    pub max_excerpt_chars: usize,

    /// Total snapshot characters allowed in one payload
    #[serde(default = "default_max_snapshot_chars")]
    pub max_snapshot_chars: usize,
}

fn default_query_commit_cap() -> usize {
    100
}

fn default_evolution_commits() -> usize {
    20
}

fn default_pattern_commits() -> usize {
    30
}

fn default_architecture_commits() -> usize {
    20
}

fn default_max_excerpt_chars() -> usize {
    4_000
}

fn default_max_snapshot_chars() -> usize {
    60_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            query_commit_cap: default_query_commit_cap(),
            evolution_commits: default_evolution_commits(),
            pattern_commits: default_pattern_commits(),
            architecture_commits: default_architecture_commits(),
            max_excerpt_chars: default_max_excerpt_chars(),
            max_snapshot_chars: default_max_snapshot_chars(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the env var holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_evolution_max_tokens")]
    pub evolution_max_tokens: u32,

    #[serde(default = "default_pattern_max_tokens")]
    pub pattern_max_tokens: u32,

    #[serde(default = "default_architecture_max_tokens")]
    pub architecture_max_tokens: u32,
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-3-5-sonnet-latest".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_evolution_max_tokens() -> u32 {
    2000
}

fn default_pattern_max_tokens() -> u32 {
    1500
}

fn default_architecture_max_tokens() -> u32 {
    1500
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            evolution_max_tokens: default_evolution_max_tokens(),
            pattern_max_tokens: default_pattern_max_tokens(),
            architecture_max_tokens: default_architecture_max_tokens(),
        }
    }
}

impl HistorianConfig {
    pub const ENV_CONFIG_PATH: &'static str = "HISTORIAN_CONFIG";

    pub const DEFAULT_CONFIG_FILENAME: &'static str = "config.toml";

    /// Load from an explicit path, `$HISTORIAN_CONFIG`, or the default location
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => Self::resolve_config_path(),
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "config not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            HistorianError::config_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;

        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: HistorianConfig = toml::from_str(contents)
            .map_err(|e| HistorianError::config_with_source("failed to parse config", e))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .map(|d| d.join("repo-historian").join(Self::DEFAULT_CONFIG_FILENAME))
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    fn validate(&self) -> Result<()> {
        if self.snapshot.max_files == 0 {
            return Err(HistorianError::config("snapshot.max_files must be positive"));
        }
        if self.context.query_commit_cap == 0 {
            return Err(HistorianError::config(
                "context.query_commit_cap must be positive",
            ));
        }

        if !(0.0..=1.0).contains(&self.snapshot.binary_threshold) {
            tracing::warn!(
                threshold = self.snapshot.binary_threshold,
                "binary_threshold outside 0..=1, binary detection will misbehave"
            );
        }

        let largest_slice = self
            .context
            .evolution_commits
            .max(self.context.pattern_commits)
            .max(self.context.architecture_commits);
        if largest_slice > self.context.query_commit_cap {
            tracing::warn!(
                largest_slice,
                cap = self.context.query_commit_cap,
                "per-mode commit slice exceeds the query cap and will never fill"
            );
        }

        Ok(())
    }

    /// Database path with a leading `~/` expanded
    pub fn resolved_db_path(&self) -> PathBuf {
        let path = &self.storage.db_path;
        if let Some(stripped) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        }
        PathBuf::from(path)
    }
}
