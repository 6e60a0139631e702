//! Configuration and data directory management.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

pub const DEFAULT_MODEL: &str = "gpt-5-nano";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_THRESHOLD: f32 = 0.4;
/// Hard request-count cap of the batch endpoint.
pub const DEFAULT_MAX_REQUESTS_PER_BATCH: usize = 50_000;
/// Soft line count that keeps a batch file well under the size cap.
pub const DEFAULT_SOFT_REQUESTS_PER_BATCH: usize = 40_000;
/// Input file size cap of the batch endpoint (200 MB).
pub const DEFAULT_MAX_BYTES_PER_BATCH: usize = 200 * 1024 * 1024;
pub const DEFAULT_COMPLETION_WINDOW: &str = "24h";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 900;

/// Paths to all SDGLens data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Report texts and sentence splits (`data/texts/<company>/<year>/`).
    pub texts: PathBuf,
    /// Similarity score tables and sentence embeddings (`data/scores_csv/`).
    pub scores: PathBuf,
    /// Keyword embedding sets (`data/keywords/`).
    pub keywords: PathBuf,
    /// Batch input JSONL files, one per chunk fingerprint (`data/batches/`).
    pub batches: PathBuf,
    /// custom_id → origin mapping files (`data/mappings/`).
    pub mappings: PathBuf,
    /// Downloaded batch outputs (`data/batch_results/`).
    pub batch_results: PathBuf,
    /// Result database and aggregates (`data/results/`).
    pub results: PathBuf,
    /// Per-document classification exports (`data/exports/`).
    pub exports: PathBuf,
    /// Batch log (`data/batch_log.json`).
    pub batch_log: PathBuf,
    /// Pipeline configuration (`data/sdglens.json`).
    pub config_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            texts: root.join("texts"),
            scores: root.join("scores_csv"),
            keywords: root.join("keywords"),
            batches: root.join("batches"),
            mappings: root.join("mappings"),
            batch_results: root.join("batch_results"),
            results: root.join("results"),
            exports: root.join("exports"),
            batch_log: root.join("batch_log.json"),
            config_file: root.join("sdglens.json"),
            root,
        };
        paths.ensure_dirs()?;
        Ok(paths)
    }

    /// Create all required directories.
    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.texts)?;
        std::fs::create_dir_all(&self.scores)?;
        std::fs::create_dir_all(&self.keywords)?;
        std::fs::create_dir_all(&self.batches)?;
        std::fs::create_dir_all(&self.mappings)?;
        std::fs::create_dir_all(&self.batch_results)?;
        std::fs::create_dir_all(&self.results)?;
        std::fs::create_dir_all(&self.exports)?;
        Ok(())
    }

    /// SQLite database holding classification results.
    pub fn results_db(&self) -> PathBuf {
        self.results.join("classifications.db")
    }
}

/// Tunables for the classification pipeline (persisted to `sdglens.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Model requested for every batch line.
    #[serde(default = "default_model")]
    pub model: String,
    /// Similarity threshold; a sentence is selected when any column is
    /// strictly above it.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Optional `max_tokens` injected into every request body.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Optional path to a prompt template containing `{sentence}`.
    #[serde(default)]
    pub prompt_template_path: Option<PathBuf>,
    #[serde(default = "default_max_requests")]
    pub max_requests_per_batch: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes_per_batch: usize,
    #[serde(default = "default_completion_window")]
    pub completion_window: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    /// Retry attempts for transient provider errors.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_base_url")]
    pub api_base_url: String,
    /// Never written back to disk; read from `OPENAI_API_KEY` when absent.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Path to config file for saving.
    #[serde(skip)]
    pub config_path: PathBuf,
}

fn default_model() -> String {
    DEFAULT_MODEL.into()
}
fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}
fn default_max_requests() -> usize {
    DEFAULT_SOFT_REQUESTS_PER_BATCH.min(DEFAULT_MAX_REQUESTS_PER_BATCH)
}
fn default_max_bytes() -> usize {
    DEFAULT_MAX_BYTES_PER_BATCH
}
fn default_completion_window() -> String {
    DEFAULT_COMPLETION_WINDOW.into()
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_poll_timeout() -> u64 {
    DEFAULT_POLL_TIMEOUT_SECS
}
fn default_retry_attempts() -> u32 {
    5
}
fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            threshold: default_threshold(),
            max_tokens: None,
            prompt_template_path: None,
            max_requests_per_batch: default_max_requests(),
            max_bytes_per_batch: default_max_bytes(),
            completion_window: default_completion_window(),
            poll_interval_secs: default_poll_interval(),
            poll_timeout_secs: default_poll_timeout(),
            retry_attempts: default_retry_attempts(),
            api_base_url: default_base_url(),
            api_key: None,
            config_path: PathBuf::new(),
        }
    }
}

impl PipelineConfig {
    /// Load config from file, falling back to env vars and defaults.
    pub fn load(config_path: &Path) -> Result<Self> {
        let mut config: PipelineConfig = match std::fs::read_to_string(config_path) {
            Ok(s) => serde_json::from_str(&s)
                .map_err(|e| Error::Config(format!("{}: {}", config_path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PipelineConfig::default(),
            Err(e) => return Err(Error::Io(e)),
        };

        config.config_path = config_path.to_path_buf();

        if config.api_key.is_none() {
            config.api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.api_base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make chunking or polling meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.max_requests_per_batch == 0 || self.max_requests_per_batch > DEFAULT_MAX_REQUESTS_PER_BATCH {
            return Err(Error::Config(format!(
                "max_requests_per_batch must be in 1..={}",
                DEFAULT_MAX_REQUESTS_PER_BATCH
            )));
        }
        if self.max_bytes_per_batch == 0 {
            return Err(Error::Config("max_bytes_per_batch must be positive".into()));
        }
        if !self.threshold.is_finite() {
            return Err(Error::Config("threshold must be a finite number".into()));
        }
        if self.model.trim().is_empty() {
            return Err(Error::Config("model must not be empty".into()));
        }
        Ok(())
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&self.config_path, json)?;
        info!("Saved pipeline config to {}", self.config_path.display());
        Ok(())
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_timeout_secs)
    }
}
