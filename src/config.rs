/// Configuration module for ragindex.
///
/// Handles loading, validating, and providing default configuration values.
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::RagError;
use crate::index::SimilarityMetric;
use crate::indexer::chunker::ChunkingConfig;
use crate::qa::prompt::FIRST_PASSAGE_OVERHEAD;

pub const DEFAULT_CONFIG_PATH: &str = "ragindex.json";

// ── Default value functions ──────────────────────────────────────────

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_top_k() -> usize {
    4
}

fn default_max_context_chars() -> usize {
    4000
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_batch_size() -> usize {
    16
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_index_path() -> String {
    "./index.rgix".to_string()
}

fn default_approximate_threshold() -> usize {
    50_000
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_endpoint() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_generation_model() -> String {
    "llama3.2".to_string()
}

fn default_dimensions() -> usize {
    768
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    #[serde(default)]
    pub similarity_metric: SimilarityMetric,

    #[serde(default = "default_concurrency_limit")]
    pub embedding_concurrency_limit: usize,

    /// Texts sent per `embed_batch` call while building.
    #[serde(default = "default_batch_size")]
    pub embedding_batch_size: usize,

    /// Applies to both embedding and generation calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: String,

    /// Corpus size at which search switches to the partitioned index. 0 disables it.
    #[serde(default = "default_approximate_threshold")]
    pub approximate_threshold: usize,

    /// Partitions probed per query; 0 picks `max(4, nlist / 8)`.
    #[serde(default)]
    pub nprobe: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetryConfig {
    /// Total generation attempts, first call included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles after each failure.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendProvider {
    #[default]
    OpenAi,
    Mock,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: BackendProvider,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GenerationConfig {
    #[serde(default)]
    pub provider: BackendProvider,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            max_context_chars: default_max_context_chars(),
            similarity_metric: SimilarityMetric::default(),
            embedding_concurrency_limit: default_concurrency_limit(),
            embedding_batch_size: default_batch_size(),
            request_timeout_secs: default_request_timeout_secs(),
            index: IndexConfig::default(),
            retry: RetryConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            approximate_threshold: default_approximate_threshold(),
            nprobe: 0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: BackendProvider::default(),
            endpoint: default_endpoint(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: BackendProvider::default(),
            endpoint: default_endpoint(),
            model: default_generation_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl EmbeddingConfig {
    /// API key read from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

impl GenerationConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to [`DEFAULT_CONFIG_PATH`].
    /// If the file does not exist, returns a default config and, for the
    /// default path only, writes a template next to the working directory.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            DEFAULT_CONFIG_PATH
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == DEFAULT_CONFIG_PATH {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        // A file that exists must parse; there is no fallback to defaults.
        let cfg: Config = serde_json::from_str(&data)
            .with_context(|| format!("invalid configuration in {path}"))?;

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values. Run before any indexing or querying.
    pub fn validate(&self) -> crate::error::Result<()> {
        self.chunking().validate()?;
        if self.top_k == 0 {
            return Err(RagError::config("top_k", "must be positive"));
        }
        if self.max_context_chars == 0 {
            return Err(RagError::config("max_context_chars", "must be positive"));
        }
        let full_passage = self.chunk_size.saturating_add(FIRST_PASSAGE_OVERHEAD);
        if self.max_context_chars < full_passage {
            return Err(RagError::config(
                "max_context_chars",
                format!(
                    "{} cannot hold one full chunk of {} chars ({full_passage} with its label)",
                    self.max_context_chars, self.chunk_size
                ),
            ));
        }
        if self.embedding_concurrency_limit == 0 {
            return Err(RagError::config(
                "embedding_concurrency_limit",
                "must be positive",
            ));
        }
        if self.embedding_batch_size == 0 {
            return Err(RagError::config("embedding_batch_size", "must be positive"));
        }
        if self.request_timeout_secs == 0 {
            return Err(RagError::config("request_timeout_secs", "must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(RagError::config(
                "retry.max_attempts",
                "must allow at least one attempt",
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(RagError::config("embedding.dimensions", "must be positive"));
        }
        Ok(())
    }

    #[must_use]
    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size,
            overlap: self.chunk_overlap,
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
