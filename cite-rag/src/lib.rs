//! Grounded retrieval-augmented question answering.
//!
//! This crate provides:
//! - Sentence-aware and fixed-width chunking with stable chunk ids ([`chunking`])
//! - An embedding adapter with batching, retries and dimension checks ([`embedding`])
//! - An exact cosine vector index with versioned persistence and an
//!   atomically swappable active handle ([`index`])
//! - Filtered, re-ranked retrieval ([`retriever`])
//! - Citation-checked answer generation with configurable violation
//!   policies ([`generator`], [`citation`])
//! - Directory ingestion and index building ([`ingest`])
//! - A service facade assembling all of the above ([`pipeline`])
//!
//! Offline providers ([`HashingEmbedder`], [`ExtractiveGenerator`]) need no
//! network access. OpenAI-backed providers live behind the `openai` feature.

pub mod chunking;
pub mod citation;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod extractive;
pub mod generation;
pub mod generator;
pub mod hashing;
pub mod index;
pub mod ingest;
pub mod pipeline;
pub mod prompt;
pub mod reranker;
pub mod retriever;
pub mod retry;
pub mod text;

#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{ChunkIter, Chunker, TextChunker, chunk};
pub use citation::{GroundingViolation, Validation, ViolationKind};
pub use config::{
    ChunkingConfig, EmbeddingConfig, GenerationConfig, RagConfig, RagConfigBuilder,
    RetrievalConfig, SplittingStrategy, ViolationPolicy,
};
pub use document::{Chunk, Citation, Document, EntryMetadata, IndexEntry, RetrievedChunk};
pub use embedding::{Embedder, EmbeddingProvider};
pub use error::{ErrorKind, ProviderError, RagError, Result};
pub use extractive::ExtractiveGenerator;
pub use generation::{GenerationOutput, GenerationProvider, GenerationRequest, Passage};
pub use generator::{
    AnswerStatus, GroundedAnswer, GroundedGenerator, INSUFFICIENT_EVIDENCE_ANSWER,
    UNABLE_TO_ANSWER,
};
pub use hashing::HashingEmbedder;
pub use index::{IndexHandle, IndexManifest, VectorIndex};
pub use ingest::{
    BuildReport, IngestFailure, IngestReport, Ingestor, ProcessedDocument, build_index, ingest,
    load_document,
};
pub use pipeline::{AskOptions, AskResponse, IngestSummary, RagService, RagServiceBuilder};
pub use reranker::{LexicalOverlapReranker, NoOpReranker, Reranker};
pub use retriever::{RetrievalFilter, Retriever};
pub use retry::RetryPolicy;
