// Embeddings module
// Embedder capability, local and Ollama-backed implementations, content chunking

pub mod chunking;
pub mod hashing;
pub mod ollama;


use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

use crate::config::EmbeddingConfig;

pub use chunking::{
    ChunkingConfig, ContentChunk, ParsingStrategy, chunk_text, estimate_token_count,
};
pub use hashing::HashingEmbedder;
pub use ollama::OllamaEmbedder;

pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Input is empty after normalization")]
    EmptyInput,
    #[error("Embedding backend unavailable: {0}")]
    Unavailable(String),
    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Embedding backend returned a zero vector")]
    ZeroVector,
    #[error("Embedding request failed: {0}")]
    Backend(String),
}

impl EmbeddingError {
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            *self,
            EmbeddingError::Unavailable(_) | EmbeddingError::Backend(_)
        )
    }
}

/// A fixed-dimension text-to-vector model.
///
/// Implementations return L2-normalized vectors so cosine similarity reduces to a dot product.
/// Construction may be expensive; calls are expected to be cheap and repeatable.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed several texts at once; the default embeds them one by one
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Build the embedder selected by the configuration
#[inline]
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match *config {
        EmbeddingConfig::Hashing(ref hashing) => Arc::new(HashingEmbedder::new(hashing.dimension)),
        EmbeddingConfig::Ollama(ref ollama) => Arc::new(OllamaEmbedder::new(ollama)?),
    };
    Ok(embedder)
}

/// Collapse runs of whitespace and trim
#[inline]
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scale `vector` to unit length in place. Returns false for zero or non-finite vectors.
#[inline]
pub fn l2_normalize(vector: &mut [f32]) -> bool {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
    true
}

/// Validate a vector coming back from a model and normalize it
#[inline]
pub fn prepare_vector(mut vector: Vec<f32>, expected: usize) -> Result<Vec<f32>, EmbeddingError> {
    if vector.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    if !l2_normalize(&mut vector) {
        return Err(EmbeddingError::ZeroVector);
    }
    Ok(vector)
}

/// SHA-256 of the chunk text, hex encoded. Used as the deduplication key.
#[inline]
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
