
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;

/// Environment variable overriding the application directory
pub const HOME_ENV_VAR: &str = "PDF_RAG_HOME";

/// Upper bound for `top_k` on any single query
pub const MAX_TOP_K: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub embedding_model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
    pub timeout_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            embedding_model: "all-minilm".to_string(),
            batch_size: 32,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_seconds: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "llama3.2".to_string(),
            temperature: 0.7,
            max_output_tokens: 1500,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Chunks retrieved when the caller does not ask for a specific count
    pub default_top_k: usize,
    /// Upper bound accepted for a query's `top_k`
    pub max_top_k: usize,
    /// Conversation turns loaded for a query
    pub history_limit: usize,
    /// Most recent turns rendered into the prompt
    pub prompt_history_turns: usize,
    /// Candidates fetched per requested result before document filtering
    pub overfetch_factor: usize,
    /// Queries allowed to hold the model backends at once
    pub max_concurrent_queries: usize,
    /// Characters of chunk text shown in a source preview
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: MAX_TOP_K,
            history_limit: 10,
            prompt_history_turns: 5,
            overfetch_factor: 3,
            max_concurrent_queries: 4,
            preview_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    pub name: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 3600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid max output tokens: {0} (must be between 1 and 32768)")]
    InvalidMaxOutputTokens(u32),
    #[error("Invalid chunk size: {0} (must be between 100 and 10000 characters)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid top_k bounds: default {0}, max {1} (need 1 <= default <= max <= 20)")]
    InvalidTopK(usize, usize),
    #[error("Prompt history turns ({0}) cannot exceed history limit ({1})")]
    PromptHistoryTooLarge(usize, usize),
    #[error("Invalid overfetch factor: {0} (must be between 1 and 100)")]
    InvalidOverfetchFactor(usize),
    #[error("Invalid concurrent query limit: {0} (must be between 1 and 256)")]
    InvalidConcurrency(usize),
    #[error("Invalid preview length: {0} (must be at least 1)")]
    InvalidPreviewLength(usize),
    #[error("Invalid index name: {0:?} (use letters, digits, '-' or '_')")]
    InvalidIndexName(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Application directory: `$PDF_RAG_HOME` if set, otherwise `~/.pdf-rag`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(home) = std::env::var_os(HOME_ENV_VAR).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(home));
        }

        dirs::home_dir()
            .map(|home| home.join(".pdf-rag"))
            .or_else(|| dirs::data_dir().map(|data| data.join("pdf-rag")))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load from the default application directory
    #[inline]
    pub fn load_default() -> Result<Self> {
        let dir = Self::config_dir().context("Failed to resolve configuration directory")?;
        Self::load(dir)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.generation.validate()?;
        self.chunking.validate()?;
        self.retrieval.validate()?;
        self.index.validate()?;
        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite database
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join("metadata.db")
    }

    /// Directory holding the persisted vector index artifacts
    #[inline]
    pub fn index_dir_path(&self) -> PathBuf {
        self.get_base_dir().join("indexes")
    }

    /// Directory holding copies of added documents
    #[inline]
    pub fn documents_dir_path(&self) -> PathBuf {
        self.get_base_dir().join("documents")
    }

    /// Lock file serializing index rebuilds across processes
    #[inline]
    pub fn indexer_lock_path(&self) -> PathBuf {
        self.get_base_dir().join(".indexer.lock")
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        if !(1..=3600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.host = host;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_embedding_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.embedding_model = model;
        Ok(())
    }

    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(64..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.embedding_dimension = dimension;
        Ok(())
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if !(1..=32768).contains(&self.max_output_tokens) {
            return Err(ConfigError::InvalidMaxOutputTokens(self.max_output_tokens));
        }

        if !(1..=3600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        Ok(())
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_temperature(&mut self, temperature: f32) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidTemperature(temperature));
        }
        self.temperature = temperature;
        Ok(())
    }
}

impl ChunkingConfig {
    /// Overlap must stay below the chunk size or splitting would never advance
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(100..=10_000).contains(&self.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }

        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                self.chunk_overlap,
                self.chunk_size,
            ));
        }

        Ok(())
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_top_k == 0
            || self.default_top_k > self.max_top_k
            || self.max_top_k > MAX_TOP_K
        {
            return Err(ConfigError::InvalidTopK(
                self.default_top_k,
                self.max_top_k,
            ));
        }

        if self.prompt_history_turns > self.history_limit {
            return Err(ConfigError::PromptHistoryTooLarge(
                self.prompt_history_turns,
                self.history_limit,
            ));
        }

        if !(1..=100).contains(&self.overfetch_factor) {
            return Err(ConfigError::InvalidOverfetchFactor(self.overfetch_factor));
        }

        if !(1..=256).contains(&self.max_concurrent_queries) {
            return Err(ConfigError::InvalidConcurrency(self.max_concurrent_queries));
        }

        if self.preview_chars == 0 {
            return Err(ConfigError::InvalidPreviewLength(self.preview_chars));
        }

        Ok(())
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(ConfigError::InvalidIndexName(self.name.clone()));
        }
        Ok(())
    }
}
