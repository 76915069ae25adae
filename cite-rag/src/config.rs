//! Configuration for the RAG pipeline.
//!
//! [`RagConfig`] groups one section per stage. Every section deserialises
//! with defaults, so a config file only needs the fields it changes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// How the chunker picks its atomic units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplittingStrategy {
    /// Never cut inside a sentence unless the sentence alone exceeds the cap.
    #[default]
    SentenceAware,
    /// Cut every `max_tokens_per_chunk` tokens regardless of sentences.
    FixedWidth,
}

/// What the generator does with an answer that fails citation validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationPolicy {
    /// Discard the answer and return the insufficient-evidence response.
    #[default]
    Reject,
    /// Remove the sentences that could not be verified.
    Strip,
    /// Return the answer marked as unverified.
    Flag,
}

/// Chunking parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Hard cap on whitespace-delimited tokens per chunk.
    pub max_tokens_per_chunk: usize,
    /// Tokens shared between consecutive chunks. Must be below the cap.
    pub overlap_tokens: usize,
    /// Atomic unit selection.
    pub strategy: SplittingStrategy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_tokens_per_chunk: 200, overlap_tokens: 40, strategy: SplittingStrategy::default() }
    }
}

impl ChunkingConfig {
    /// Check `0 <= overlap < max` and `max > 0`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens_per_chunk == 0 {
            return Err(RagError::ConfigError(
                "max_tokens_per_chunk must be greater than zero".to_string(),
            ));
        }
        if self.overlap_tokens >= self.max_tokens_per_chunk {
            return Err(RagError::ConfigError(format!(
                "overlap_tokens ({}) must be less than max_tokens_per_chunk ({})",
                self.overlap_tokens, self.max_tokens_per_chunk
            )));
        }
        Ok(())
    }
}

/// Embedding adapter parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Maximum texts sent to the provider in one call.
    pub batch_size: usize,
    /// Maximum batches in flight at once.
    pub max_concurrency: usize,
    /// Retry behaviour for transient provider failures.
    pub retry: RetryPolicy,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { batch_size: 32, max_concurrency: 4, retry: RetryPolicy::default() }
    }
}

/// Retrieval parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of chunks returned when the caller does not say otherwise.
    pub top_k: usize,
    /// Index candidates fetched per requested result, to leave room for filters.
    pub candidate_multiplier: usize,
    /// Minimum cosine similarity for a candidate to be kept.
    pub similarity_threshold: Option<f32>,
    /// Score added per distinct query term found in a chunk. Zero disables re-ranking.
    pub lexical_boost: f32,
    /// Upper bound on the summed tokens of returned chunks.
    pub token_budget: Option<usize>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            candidate_multiplier: 4,
            similarity_threshold: None,
            lexical_boost: 0.02,
            token_budget: None,
        }
    }
}

impl RetrievalConfig {
    /// Candidates to request from the index for `top_k` results.
    pub fn candidate_k(&self, top_k: usize) -> usize {
        top_k.saturating_mul(self.candidate_multiplier.max(1))
    }
}

/// Grounded generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// What to do with answers that fail citation validation.
    pub violation_policy: ViolationPolicy,
    /// Treat sentences without any citation as violations.
    pub require_sentence_citations: bool,
    /// Deadline for one generation call, retries included, in milliseconds.
    pub timeout_ms: u64,
    /// Sampling temperature passed to the provider.
    pub temperature: f32,
    /// Output token cap passed to the provider.
    pub max_output_tokens: Option<u32>,
    /// Retry behaviour for transient provider failures.
    pub retry: RetryPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            violation_policy: ViolationPolicy::default(),
            require_sentence_citations: true,
            timeout_ms: 60_000,
            temperature: 0.1,
            max_output_tokens: Some(1000),
            retry: RetryPolicy { max_attempts: 2, ..RetryPolicy::default() },
        }
    }
}

impl GenerationConfig {
    /// The generation deadline as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration parameters for the RAG pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Chunker settings.
    pub chunking: ChunkingConfig,
    /// Embedding adapter settings.
    pub embedding: EmbeddingConfig,
    /// Retriever settings.
    pub retrieval: RetrievalConfig,
    /// Grounded generator settings.
    pub generation: GenerationConfig,
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Read a JSON config file and validate it. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] or [`RagError::Serialization`] when the file
    /// cannot be read or parsed, and [`RagError::ConfigError`] when it is invalid.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `overlap_tokens >= max_tokens_per_chunk` or the cap is zero
    /// - `top_k == 0`
    /// - `batch_size == 0` or `max_concurrency == 0`
    /// - `timeout_ms == 0`
    /// - the similarity threshold is outside `[-1, 1]`
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if self.retrieval.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if self.embedding.batch_size == 0 {
            return Err(RagError::ConfigError("batch_size must be greater than zero".to_string()));
        }
        if self.embedding.max_concurrency == 0 {
            return Err(RagError::ConfigError(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }
        if self.generation.timeout_ms == 0 {
            return Err(RagError::ConfigError("timeout_ms must be greater than zero".to_string()));
        }
        if let Some(threshold) = self.retrieval.similarity_threshold {
            if !(-1.0..=1.0).contains(&threshold) {
                return Err(RagError::ConfigError(format!(
                    "similarity_threshold ({threshold}) must be within [-1, 1]"
                )));
            }
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum tokens per chunk.
    pub fn max_tokens_per_chunk(mut self, max: usize) -> Self {
        self.config.chunking.max_tokens_per_chunk = max;
        self
    }

    /// Set the overlap between consecutive chunks in tokens.
    pub fn overlap_tokens(mut self, overlap: usize) -> Self {
        self.config.chunking.overlap_tokens = overlap;
        self
    }

    /// Set the chunk splitting strategy.
    pub fn splitting_strategy(mut self, strategy: SplittingStrategy) -> Self {
        self.config.chunking.strategy = strategy;
        self
    }

    /// Set the embedding batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.embedding.batch_size = size;
        self
    }

    /// Set the number of embedding batches allowed in flight.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.embedding.max_concurrency = limit;
        self
    }

    /// Set the retry policy of the embedding adapter.
    pub fn embedding_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.embedding.retry = policy;
        self
    }

    /// Set the default number of retrieved chunks.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.retrieval.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.retrieval.similarity_threshold = Some(threshold);
        self
    }

    /// Set the lexical re-ranking boost per matched query term.
    pub fn lexical_boost(mut self, boost: f32) -> Self {
        self.config.retrieval.lexical_boost = boost;
        self
    }

    /// Cap the summed tokens of retrieved chunks.
    pub fn token_budget(mut self, budget: usize) -> Self {
        self.config.retrieval.token_budget = Some(budget);
        self
    }

    /// Set the grounding violation policy.
    pub fn violation_policy(mut self, policy: ViolationPolicy) -> Self {
        self.config.generation.violation_policy = policy;
        self
    }

    /// Require a citation in every sentence of an answer.
    pub fn require_sentence_citations(mut self, required: bool) -> Self {
        self.config.generation.require_sentence_citations = required;
        self
    }

    /// Set the generation deadline.
    pub fn generation_timeout(mut self, timeout: Duration) -> Self {
        self.config.generation.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the retry policy of the generation call.
    pub fn generation_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.generation.retry = policy;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] as described in [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(RagConfig::default().validate().is_ok());
        assert_eq!(RagConfig::default().generation.violation_policy, ViolationPolicy::Reject);
    }

    #[test]
    fn rejects_overlap_not_below_cap() {
        let err = RagConfig::builder().max_tokens_per_chunk(10).overlap_tokens(10).build();
        assert!(matches!(err, Err(RagError::ConfigError(msg)) if msg.contains("overlap_tokens")));
    }

    #[test]
    fn rejects_zero_top_k_and_bad_threshold() {
        assert!(RagConfig::builder().top_k(0).build().is_err());
        assert!(RagConfig::builder().similarity_threshold(1.5).build().is_err());
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config: RagConfig = serde_json::from_str(
            r#"{"retrieval": {"top_k": 3}, "generation": {"violation_policy": "strip"}}"#,
        )
        .unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.retrieval.candidate_multiplier, 4);
        assert_eq!(config.generation.violation_policy, ViolationPolicy::Strip);
        assert_eq!(config.chunking, ChunkingConfig::default());
    }

    #[test]
    fn from_json_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"chunking": {"max_tokens_per_chunk": 5, "overlap_tokens": 9}}"#)
            .unwrap();
        assert!(matches!(RagConfig::from_json_file(&path), Err(RagError::ConfigError(_))));
    }

    #[test]
    fn candidate_k_never_below_top_k() {
        let retrieval = RetrievalConfig { candidate_multiplier: 0, ..RetrievalConfig::default() };
        assert_eq!(retrieval.candidate_k(5), 5);
    }
}
