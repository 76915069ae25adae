//! Embedding providers and the batching, retrying [`Embedder`] adapter.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::document::Chunk;
use crate::error::{ProviderError, RagError, Result};

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends behind a unified async
/// interface. They make a single attempt per call; retries, batching and
/// dimension checks live in [`Embedder`].
///
/// # Example
///
/// ```rust,ignore
/// use cite_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let vectors = provider.embed_batch(&["hello", "world"]).await?;
/// assert_eq!(vectors.len(), 2);
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate one embedding per input text, in input order.
    async fn embed_batch(
        &self,
        texts: &[&str],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError>;

    /// Identifier of the embedding model, recorded in index manifests.
    fn name(&self) -> &str;
}

/// Wraps an [`EmbeddingProvider`] with batching, bounded concurrency, retries
/// and dimension validation.
///
/// The first successful call fixes the embedding dimension; every later vector
/// must match it. A loaded index can pre-seed the dimension with
/// [`with_expected_dimension`](Embedder::with_expected_dimension).
///
/// # Example
///
/// ```rust,ignore
/// use cite_rag::{Embedder, EmbeddingConfig, HashingEmbedder};
///
/// let embedder = Embedder::new(Arc::new(HashingEmbedder::new(256)), EmbeddingConfig::default());
/// let vectors = embedder.embed(&["first", "second"]).await?;
/// ```
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    config: EmbeddingConfig,
    dimension: OnceLock<usize>,
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .field("dimension", &self.dimension.get())
            .finish()
    }
}

impl Embedder {
    /// Create an adapter around `provider`.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: EmbeddingConfig) -> Self {
        Self { provider, config, dimension: OnceLock::new() }
    }

    /// Fix the expected dimension up front, e.g. from an index manifest.
    pub fn with_expected_dimension(self, dimension: usize) -> Self {
        let _ = self.dimension.set(dimension);
        self
    }

    /// Identifier of the wrapped embedding model.
    pub fn model_id(&self) -> &str {
        self.provider.name()
    }

    /// The established embedding dimension, once known.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    /// Embed `texts`, returning one vector per input in input order.
    ///
    /// Either every text is embedded or the call fails; no partial result is
    /// returned.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmbeddingUnavailable`] when a batch still fails after
    ///   the retry policy is exhausted, or fails with a non-transient error.
    /// - [`RagError::DimensionMismatch`] when a vector disagrees with the
    ///   established dimension.
    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<Vec<Vec<f32>>> = stream::iter(texts.chunks(batch_size).enumerate())
            .map(|(index, batch)| self.embed_one_batch(index, batch))
            .buffered(self.config.max_concurrency.max(1))
            .try_collect()
            .await?;

        let vectors: Vec<Vec<f32>> = batches.into_iter().flatten().collect();
        for vector in &vectors {
            self.check_dimension(vector.len())?;
        }
        debug!(
            model = self.model_id(),
            count = vectors.len(),
            batch_size,
            "embedded texts"
        );
        Ok(vectors)
    }

    /// Embed a single query string.
    ///
    /// # Errors
    ///
    /// Same as [`embed`](Embedder::embed).
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[query]).await?;
        vectors.pop().ok_or_else(|| RagError::EmbeddingUnavailable {
            provider: self.model_id().to_string(),
            attempts: 1,
            message: "provider returned no vector for the query".to_string(),
        })
    }

    /// Embed the text of every chunk and attach the vectors in place.
    ///
    /// # Errors
    ///
    /// Same as [`embed`](Embedder::embed). On error no chunk is modified.
    pub async fn embed_chunks(&self, chunks: &mut [Chunk]) -> Result<()> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.embed(&texts).await?;
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding = Some(vector);
        }
        Ok(())
    }

    async fn embed_one_batch(&self, index: usize, batch: &[&str]) -> Result<Vec<Vec<f32>>> {
        let provider = self.provider.as_ref();
        self.config
            .retry
            .run("embed_batch", move |attempt| async move {
                debug!(batch = index, attempt, size = batch.len(), "embedding batch");
                let vectors = provider.embed_batch(batch).await?;
                if vectors.len() != batch.len() {
                    return Err(ProviderError::InvalidResponse(format!(
                        "expected {} vectors, got {}",
                        batch.len(),
                        vectors.len()
                    )));
                }
                if vectors.iter().any(Vec::is_empty) {
                    return Err(ProviderError::InvalidResponse("empty embedding vector".into()));
                }
                Ok(vectors)
            })
            .await
            .map_err(|failure| {
                warn!(
                    model = provider.name(),
                    batch = index,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "embedding batch failed"
                );
                RagError::EmbeddingUnavailable {
                    provider: provider.name().to_string(),
                    attempts: failure.attempts,
                    message: failure.error.to_string(),
                }
            })
    }

    /// Establish `actual` as the dimension, or check it against the one
    /// already established.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] when a different dimension is
    /// already known.
    pub fn check_dimension(&self, actual: usize) -> Result<()> {
        let expected = *self.dimension.get_or_init(|| actual);
        if expected != actual {
            return Err(RagError::DimensionMismatch { expected, actual });
        }
        Ok(())
    }
}
