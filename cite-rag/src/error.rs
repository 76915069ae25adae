//! Error types for the `cite-rag` crate.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in RAG operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// The embedding service failed after all retry attempts, or failed with
    /// a non-transient error.
    #[error("Embedding unavailable ({provider}) after {attempts} attempt(s): {message}")]
    EmbeddingUnavailable {
        /// The embedding provider that produced the error.
        provider: String,
        /// Number of attempts made.
        attempts: u32,
        /// A description of the last failure.
        message: String,
    },

    /// A vector's dimension does not match the established dimension.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The dimension fixed by the index or the first embedding call.
        expected: usize,
        /// The offending dimension.
        actual: usize,
    },

    /// An index build was requested with zero entries.
    #[error("Refusing to build an empty index: no entries were provided")]
    EmptyIndex,

    /// The generation call exceeded its deadline or was cancelled.
    #[error("Generation timed out after {elapsed:?}")]
    GenerationTimeout {
        /// Time spent before giving up.
        elapsed: Duration,
    },

    /// The generation service failed after all retry attempts, or failed
    /// with a non-transient error.
    #[error("Generation unavailable ({provider}) after {attempts} attempt(s): {message}")]
    GenerationUnavailable {
        /// The generation provider that produced the error.
        provider: String,
        /// Number of attempts made.
        attempts: u32,
        /// A description of the last failure.
        message: String,
    },

    /// A persisted index was built with a different embedding model or dimension.
    #[error("Index at {path} is incompatible: {reason}")]
    IndexIncompatible {
        /// Directory of the persisted index.
        path: PathBuf,
        /// What did not match.
        reason: String,
    },

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A document could not be loaded or processed.
    #[error("Ingestion error ({path}): {message}")]
    IngestionError {
        /// The offending file.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// An I/O error while reading or writing persisted state.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A (de)serialization error for persisted state.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// A serialisable classification of [`RagError`], used in reports and traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The embedding provider failed after retries.
    EmbeddingUnavailable,
    /// A vector length disagreed with the established dimension.
    DimensionMismatch,
    /// An index was built from no entries.
    EmptyIndex,
    /// Generation hit its deadline or was cancelled.
    GenerationTimeout,
    /// The generation provider failed after retries.
    GenerationUnavailable,
    /// A persisted index belongs to another model or dimension.
    IndexIncompatible,
    /// Invalid configuration.
    Config,
    /// A document could not be loaded.
    Ingestion,
    /// Filesystem failure.
    Io,
    /// JSON encoding or decoding failure.
    Serialization,
}

impl ErrorKind {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmbeddingUnavailable => "embedding_unavailable",
            Self::DimensionMismatch => "dimension_mismatch",
            Self::EmptyIndex => "empty_index",
            Self::GenerationTimeout => "generation_timeout",
            Self::GenerationUnavailable => "generation_unavailable",
            Self::IndexIncompatible => "index_incompatible",
            Self::Config => "config",
            Self::Ingestion => "ingestion",
            Self::Io => "io",
            Self::Serialization => "serialization",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RagError {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmbeddingUnavailable { .. } => ErrorKind::EmbeddingUnavailable,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::EmptyIndex => ErrorKind::EmptyIndex,
            Self::GenerationTimeout { .. } => ErrorKind::GenerationTimeout,
            Self::GenerationUnavailable { .. } => ErrorKind::GenerationUnavailable,
            Self::IndexIncompatible { .. } => ErrorKind::IndexIncompatible,
            Self::ConfigError(_) => ErrorKind::Config,
            Self::IngestionError { .. } => ErrorKind::Ingestion,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether the caller may reasonably retry the whole request later.
    ///
    /// Configuration errors (dimension or index mismatches) never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable { .. }
                | Self::GenerationTimeout { .. }
                | Self::GenerationUnavailable { .. }
        )
    }
}

/// A failure reported by an external embedding or generation service.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// The request did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The service asked the client to slow down.
    #[error("rate limited: {message}")]
    RateLimited {
        /// A description from the service.
        message: String,
        /// Server-suggested wait before retrying.
        retry_after: Option<Duration>,
    },

    /// Connection or server-side failure that may succeed on retry.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request was rejected (bad input, authentication, quota).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The service answered with something that could not be used.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether the failure is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited { .. } | Self::Transport(_))
    }

    /// Server-suggested wait, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
