
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{Embedder, EmbeddingError, l2_normalize, normalize_text};

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic offline embedder based on feature hashing.
///
/// Lowercased word tokens and their character trigrams are hashed into signed buckets.
/// Texts sharing vocabulary land close together under cosine distance, which is enough
/// for local use without a model server and makes imports reproducible.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_name: String,
}

impl HashingEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            model_name: format!("feature-hashing-{}", dimension.max(1)),
        }
    }

    #[inline]
    pub fn embed_sync(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let normalized = normalize_text(text).to_lowercase();
        if normalized.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut vector = vec![0.0_f32; self.dimension];
        let tokens = normalized
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty());

        for token in tokens {
            self.accumulate(&mut vector, token, WORD_WEIGHT);

            let marked: Vec<char> = format!("^{token}$").chars().collect();
            for window in marked.windows(3) {
                let gram: String = window.iter().collect();
                self.accumulate(&mut vector, &gram, TRIGRAM_WEIGHT);
            }
        }

        // Only punctuation or symbols: nothing to embed
        if !l2_normalize(&mut vector) {
            return Err(EmbeddingError::EmptyInput);
        }

        Ok(vector)
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket_bytes = [0_u8; 8];
        bucket_bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        if let Some(slot) = vector.get_mut(bucket) {
            *slot += sign * weight;
        }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    #[inline]
    fn model_name(&self) -> &str {
        &self.model_name
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_sync(text)
    }
}
