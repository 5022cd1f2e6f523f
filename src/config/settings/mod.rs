
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::DEFAULT_EMBEDDING_DIMENSION;
use crate::embeddings::chunking::ParsingStrategy;

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub import: ImportSettings,
    #[serde(default)]
    pub index: IndexSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub rag: RagSettings,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Which model turns text into vectors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum EmbeddingConfig {
    Hashing(HashingEmbeddingConfig),
    Ollama(OllamaEmbeddingConfig),
}

impl Default for EmbeddingConfig {
    #[inline]
    fn default() -> Self {
        EmbeddingConfig::Hashing(HashingEmbeddingConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HashingEmbeddingConfig {
    pub dimension: usize,
}

impl Default for HashingEmbeddingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaEmbeddingConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
}

impl Default for OllamaEmbeddingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "all-minilm:latest".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            timeout_secs: 30,
        }
    }
}

/// Which service composes answers for RAG queries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum GenerationConfig {
    Ollama(OllamaGenerationConfig),
    OpenAi(OpenAiGenerationConfig),
}

impl Default for GenerationConfig {
    #[inline]
    fn default() -> Self {
        GenerationConfig::Ollama(OllamaGenerationConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaGenerationConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for OllamaGenerationConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "llama3.2:latest".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Any server speaking the OpenAI chat completions protocol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiGenerationConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for OpenAiGenerationConfig {
    #[inline]
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImportSettings {
    /// Chunk size in characters
    pub chunk_size: usize,
    /// Characters carried over from the end of one chunk into the next
    pub overlap_size: usize,
    pub batch_size: usize,
    pub parsing_strategy: ParsingStrategy,
    /// Extensions accepted when expanding directories; empty accepts every registered extension
    pub file_types: Vec<String>,
}

impl Default for ImportSettings {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap_size: 200,
            batch_size: 32,
            parsing_strategy: ParsingStrategy::default(),
            file_types: vec!["txt".to_string(), "md".to_string(), "markdown".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexSettings {
    pub file_name: String,
    pub initial_capacity: usize,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub verify_on_startup: bool,
}

impl Default for IndexSettings {
    #[inline]
    fn default() -> Self {
        Self {
            file_name: "vectors.idx".to_string(),
            initial_capacity: 1000,
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            verify_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchSettings {
    pub default_limit: usize,
    pub min_score: f32,
    /// Neighbors requested from the index per wanted result
    pub overfetch_factor: usize,
}

impl Default for SearchSettings {
    #[inline]
    fn default() -> Self {
        Self {
            default_limit: 10,
            min_score: 0.4,
            overfetch_factor: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagSettings {
    pub max_context_chunks: usize,
    pub min_score: f32,
}

impl Default for RagSettings {
    #[inline]
    fn default() -> Self {
        Self {
            max_context_chunks: 5,
            min_score: 0.4,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Data directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid embedding dimension: {0} (must be between 8 and 4096)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid API key variable name: {0:?}")]
    InvalidApiKeyEnv(String),
    #[error("Invalid chunk size: {0} (must be between 1 and 100000)")]
    InvalidChunkSize(usize),
    #[error("Overlap size ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(usize),
    #[error("Invalid index file name: {0:?}")]
    InvalidIndexFileName(String),
    #[error("Invalid index capacity: {0} (must be between 1 and 1000000)")]
    InvalidCapacity(usize),
    #[error("Invalid graph degree: {0} (must be between 2 and 128)")]
    InvalidGraphDegree(usize),
    #[error("Construction breadth ({0}) must be at least the graph degree ({1})")]
    ConstructionBreadthTooSmall(usize, usize),
    #[error("Invalid search breadth: {0} (must be at least 1)")]
    InvalidSearchBreadth(usize),
    #[error("Invalid result limit: {0} (must be at least 1)")]
    InvalidLimit(usize),
    #[error("Invalid minimum score: {0} (must be between 0 and 1)")]
    InvalidMinScore(f32),
    #[error("Invalid over-fetch factor: {0} (must be between 1 and 100)")]
    InvalidOverfetchFactor(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Defaults rooted at `base_dir`
    #[inline]
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Platform data directory used when no directory is given on the command line
    #[inline]
    pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
        dirs::data_dir()
            .or_else(dirs::home_dir)
            .map(|dir| dir.join("doc-vault"))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::with_base_dir(config_dir));
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

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.generation.validate()?;
        self.import.validate()?;
        self.index.validate()?;
        self.search.validate()?;
        self.rag.validate()?;
        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Path of the SQLite metadata store
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join("metadata.db")
    }

    /// Path of the persisted similarity index
    #[inline]
    pub fn index_path(&self) -> PathBuf {
        self.get_base_dir().join(&self.index.file_name)
    }
}

impl EmbeddingConfig {
    #[inline]
    pub fn dimension(&self) -> usize {
        match *self {
            EmbeddingConfig::Hashing(ref hashing) => hashing.dimension,
            EmbeddingConfig::Ollama(ref ollama) => ollama.dimension,
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_dimension(self.dimension())?;
        match *self {
            EmbeddingConfig::Hashing(_) => Ok(()),
            EmbeddingConfig::Ollama(ref ollama) => {
                validate_endpoint(&ollama.protocol, &ollama.host, ollama.port)?;
                validate_model(&ollama.model)?;
                validate_timeout(ollama.timeout_secs)
            }
        }
    }
}

impl OllamaEmbeddingConfig {
    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        endpoint_url(&self.protocol, &self.host, self.port)
    }
}

impl GenerationConfig {
    #[inline]
    pub fn model(&self) -> &str {
        match *self {
            GenerationConfig::Ollama(ref ollama) => &ollama.model,
            GenerationConfig::OpenAi(ref openai) => &openai.model,
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            GenerationConfig::Ollama(ref ollama) => {
                validate_endpoint(&ollama.protocol, &ollama.host, ollama.port)?;
                validate_model(&ollama.model)?;
                validate_timeout(ollama.timeout_secs)
            }
            GenerationConfig::OpenAi(ref openai) => {
                let url = Url::parse(&openai.base_url)
                    .map_err(|_| ConfigError::InvalidUrl(openai.base_url.clone()))?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
                }
                if openai.api_key_env.trim().is_empty() {
                    return Err(ConfigError::InvalidApiKeyEnv(openai.api_key_env.clone()));
                }
                validate_model(&openai.model)?;
                validate_timeout(openai.timeout_secs)
            }
        }
    }
}

impl OllamaGenerationConfig {
    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        endpoint_url(&self.protocol, &self.host, self.port)
    }
}

impl ImportSettings {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100_000).contains(&self.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        if self.overlap_size >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                self.overlap_size,
                self.chunk_size,
            ));
        }
        if !(1..=1000).contains(&self.batch_size) {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }
        Ok(())
    }
}

impl IndexSettings {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = self.file_name.trim();
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(ConfigError::InvalidIndexFileName(self.file_name.clone()));
        }
        if !(1..=1_000_000).contains(&self.initial_capacity) {
            return Err(ConfigError::InvalidCapacity(self.initial_capacity));
        }
        if !(2..=128).contains(&self.m) {
            return Err(ConfigError::InvalidGraphDegree(self.m));
        }
        if self.ef_construction < self.m {
            return Err(ConfigError::ConstructionBreadthTooSmall(
                self.ef_construction,
                self.m,
            ));
        }
        if self.ef_search == 0 {
            return Err(ConfigError::InvalidSearchBreadth(self.ef_search));
        }
        Ok(())
    }
}

impl SearchSettings {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_limit == 0 {
            return Err(ConfigError::InvalidLimit(self.default_limit));
        }
        validate_min_score(self.min_score)?;
        if !(1..=100).contains(&self.overfetch_factor) {
            return Err(ConfigError::InvalidOverfetchFactor(self.overfetch_factor));
        }
        Ok(())
    }
}

impl RagSettings {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_context_chunks == 0 {
            return Err(ConfigError::InvalidLimit(self.max_context_chunks));
        }
        validate_min_score(self.min_score)
    }
}

#[inline]
pub fn validate_min_score(min_score: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&min_score) {
        return Err(ConfigError::InvalidMinScore(min_score));
    }
    Ok(())
}

fn validate_dimension(dimension: usize) -> Result<(), ConfigError> {
    if !(8..=4096).contains(&dimension) {
        return Err(ConfigError::InvalidEmbeddingDimension(dimension));
    }
    Ok(())
}

fn validate_model(model: &str) -> Result<(), ConfigError> {
    if model.trim().is_empty() {
        return Err(ConfigError::InvalidModel(model.to_string()));
    }
    Ok(())
}

fn validate_timeout(timeout_secs: u64) -> Result<(), ConfigError> {
    if !(1..=600).contains(&timeout_secs) {
        return Err(ConfigError::InvalidTimeout(timeout_secs));
    }
    Ok(())
}

fn validate_endpoint(protocol: &str, host: &str, port: u16) -> Result<(), ConfigError> {
    if protocol != "http" && protocol != "https" {
        return Err(ConfigError::InvalidProtocol(protocol.to_string()));
    }
    if port == 0 {
        return Err(ConfigError::InvalidPort(port));
    }
    endpoint_url(protocol, host, port)?;
    Ok(())
}

fn endpoint_url(protocol: &str, host: &str, port: u16) -> Result<Url, ConfigError> {
    let url_str = format!("{}://{}:{}", protocol, host, port);
    Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
}
