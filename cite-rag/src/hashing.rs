//! Offline embedding provider based on feature hashing.

use std::hash::Hasher;

use async_trait::async_trait;
use twox_hash::XxHash64;

use crate::embedding::EmbeddingProvider;
use crate::error::ProviderError;
use crate::text;

/// Default number of hash buckets.
pub const DEFAULT_HASHING_DIMENSION: usize = 384;

/// A deterministic [`EmbeddingProvider`] that needs no network access.
///
/// Each content term of the input is hashed into one of `dimension` buckets
/// with a hash-derived sign, and the resulting count vector is L2-normalised.
/// Texts sharing terms get a positive cosine similarity; texts with no terms
/// in common score close to zero.
///
/// # Example
///
/// ```rust,ignore
/// use cite_rag::HashingEmbedder;
///
/// let provider = HashingEmbedder::new(256);
/// let vectors = provider.embed_batch(&["Paris is the capital of France"]).await?;
/// assert_eq!(vectors[0].len(), 256);
/// ```
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    name: String,
}

impl HashingEmbedder {
    /// Create a provider producing vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self { dimension, name: format!("hashing-xxh64-{dimension}") }
    }

    /// Number of components in every produced vector.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed one text.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for term in text::terms(text) {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(term.as_bytes());
            let hash = hasher.finish();
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed_batch(
        &self,
        texts: &[&str],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
