use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("No processor found for file extension: {extension}")]
    ProcessorNotFound { path: PathBuf, extension: String },

    #[error("Embedding error: {0}")]
    Embedding(#[from] embeddings::EmbeddingError),

    #[error("Similarity index is corrupt: {0}")]
    IndexCorruption(String),

    #[error("Failed to persist similarity index to {}: {message}", path.display())]
    IndexPersist { path: PathBuf, message: String },

    #[error("Similarity index error: {0}")]
    Index(String),

    #[error("Vector store is not initialized")]
    NotInitialized,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl VaultError {
    /// Whether retrying the failed operation could succeed without user intervention
    #[inline]
    pub fn is_retryable(&self) -> bool {
        match *self {
            VaultError::Embedding(ref e) => e.is_retryable(),
            VaultError::IndexPersist { .. }
            | VaultError::Connection(_)
            | VaultError::Timeout(_)
            | VaultError::Io(_) => true,
            VaultError::ProcessorNotFound { .. }
            | VaultError::IndexCorruption(_)
            | VaultError::Index(_)
            | VaultError::NotInitialized
            | VaultError::ModelNotFound(_)
            | VaultError::Configuration(_)
            | VaultError::Database(_)
            | VaultError::Other(_) => false,
        }
    }
}

impl VaultError {
    /// Wrap a metadata store failure, keeping its context chain
    #[inline]
    pub fn database(err: &anyhow::Error) -> Self {
        VaultError::Database(format!("{err:#}"))
    }
}

impl From<database::IndexError> for VaultError {
    #[inline]
    fn from(err: database::IndexError) -> Self {
        match err {
            database::IndexError::Corrupt(message) => VaultError::IndexCorruption(message),
            other => VaultError::Index(other.to_string()),
        }
    }
}

impl From<rag::GenerationError> for VaultError {
    #[inline]
    fn from(err: rag::GenerationError) -> Self {
        match err {
            rag::GenerationError::Connection { endpoint, message } => {
                VaultError::Connection(format!("{endpoint}: {message}"))
            }
            rag::GenerationError::Timeout { seconds } => VaultError::Timeout(seconds),
            rag::GenerationError::ModelNotFound(model) => VaultError::ModelNotFound(model),
            rag::GenerationError::Provider(message) => {
                VaultError::Other(anyhow::anyhow!("Generation failed: {message}"))
            }
        }
    }
}

impl From<config::ConfigError> for VaultError {
    #[inline]
    fn from(err: config::ConfigError) -> Self {
        VaultError::Configuration(err.to_string())
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod processors;
pub mod rag;
pub mod stats;
pub mod store;
