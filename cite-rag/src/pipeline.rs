//! Service facade tying ingestion, retrieval and generation together.
//!
//! [`RagService`] owns the active index handle. Ingestion builds a complete
//! replacement index and swaps it in; queries read whatever index is active
//! when they start.
//!
//! # Example
//!
//! ```rust,ignore
//! use cite_rag::{ExtractiveGenerator, HashingEmbedder, RagConfig, RagService};
//!
//! let service = RagService::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(HashingEmbedder::default()))
//!     .generation_provider(Arc::new(ExtractiveGenerator::new()))
//!     .build()?;
//!
//! service.ingest_documents(&documents).await?;
//! let response = service.ask("What is the capital of France?").await;
//! println!("{}", response.answer.text);
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use cite_telemetry::{Stage, TraceEmitter, TraceEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Span, error, info, instrument, warn};

use crate::chunking::{Chunker, TextChunker};
use crate::config::RagConfig;
use crate::document::{Document, IndexEntry, RetrievedChunk};
use crate::embedding::{Embedder, EmbeddingProvider};
use crate::error::{ErrorKind, RagError, Result};
use crate::generation::GenerationProvider;
use crate::generator::{GroundedAnswer, GroundedGenerator};
use crate::index::{IndexHandle, VectorIndex};
use crate::ingest::IngestFailure;
use crate::reranker::Reranker;
use crate::retriever::{RetrievalFilter, Retriever};

/// Per-request overrides for [`RagService::ask_with`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AskOptions {
    /// Number of chunks to retrieve instead of the configured `top_k`.
    pub top_k: Option<usize>,
    /// Restrictions on which chunks may be retrieved.
    pub filter: Option<RetrievalFilter>,
}

/// The outcome of one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResponse {
    /// Identifier shared by every trace event of this request.
    pub request_id: String,
    /// The question as asked.
    pub query: String,
    /// Version of the index the question was answered from.
    pub index_version: u64,
    /// Chunks passed to the generator, in rank order.
    pub retrieved: Vec<RetrievedChunk>,
    /// The answer. Its status is
    /// [`Unavailable`](crate::AnswerStatus::Unavailable) when `error` is set.
    pub answer: GroundedAnswer,
    /// Why the request could not be answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl AskResponse {
    /// Whether the request failed before an answer could be produced.
    pub fn is_unable_to_answer(&self) -> bool {
        self.error.is_some()
    }
}

/// Result of [`RagService::ingest_documents`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestSummary {
    /// Version of the active index after the call.
    pub index_version: u64,
    /// Ids of the documents added or replaced.
    pub documents: Vec<String>,
    /// Entries in the active index after the call.
    pub entries: usize,
    /// Documents that were skipped.
    pub failures: Vec<IngestFailure>,
}

/// Grounded question answering over an in-process index.
///
/// Construct one via [`RagService::builder()`].
pub struct RagService {
    config: RagConfig,
    embedder: Arc<Embedder>,
    chunker: Arc<dyn Chunker>,
    index: Arc<IndexHandle>,
    retriever: Retriever,
    generator: GroundedGenerator,
    emitter: TraceEmitter,
    rebuild: Mutex<()>,
}

impl std::fmt::Debug for RagService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagService")
            .field("embedder", &self.embedder)
            .field("index_version", &self.index.version())
            .finish_non_exhaustive()
    }
}

impl RagService {
    /// Create a new [`RagServiceBuilder`].
    pub fn builder() -> RagServiceBuilder {
        RagServiceBuilder::default()
    }

    /// Return a reference to the service configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// The embedding adapter shared by ingestion and retrieval.
    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    /// The active index handle.
    pub fn index(&self) -> &Arc<IndexHandle> {
        &self.index
    }

    /// The retriever used by [`ask`](RagService::ask).
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// The generator used by [`ask`](RagService::ask).
    pub fn generator(&self) -> &GroundedGenerator {
        &self.generator
    }

    /// Chunk, embed and index `documents`, replacing earlier versions.
    ///
    /// Existing entries with the same document id or source URI as an
    /// incoming document are dropped. A document whose chunks cannot be
    /// embedded is skipped and reported; the remaining documents are indexed.
    /// The new index is built in full and then swapped in, so concurrent
    /// queries see either the old or the new index. Rebuilds are serialised.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyIndex`] when the result would hold no entry.
    #[instrument(
        name = "rag.ingest_documents",
        skip_all,
        fields(request.id, documents = documents.len(), index.version, failures)
    )]
    pub async fn ingest_documents(&self, documents: &[Document]) -> Result<IngestSummary> {
        let _guard = self.rebuild.lock().await;
        let request_id = uuid::Uuid::new_v4().to_string();
        Span::current().record("request.id", request_id.as_str());
        self.emitter.emit(
            TraceEvent::start(&request_id, Stage::Ingestion)
                .with_attribute("documents", documents.len()),
        );

        let result = self.rebuild_with(documents).await;
        let end = TraceEvent::end(&request_id, Stage::Ingestion);
        match &result {
            Ok(summary) => {
                Span::current().record("index.version", summary.index_version);
                Span::current().record("failures", summary.failures.len());
                self.emitter.emit(
                    end.with_attribute("index_version", summary.index_version)
                        .with_attribute("entries", summary.entries)
                        .with_attribute("failures", summary.failures.len()),
                );
            }
            Err(e) => {
                error!(error = %e, "ingestion failed");
                self.emitter.emit(end.with_attribute("error", e.kind().as_str()));
            }
        }
        result
    }

    async fn rebuild_with(&self, documents: &[Document]) -> Result<IngestSummary> {
        let mut fresh = Vec::new();
        let mut accepted = Vec::new();
        let mut failures = Vec::new();

        for document in documents {
            let mut chunks = self.chunker.chunk(document);
            if let Err(e) = self.embedder.embed_chunks(&mut chunks).await {
                warn!(document.id = %document.id, error = %e, "skipping document");
                failures.push(IngestFailure::new(&document.source_uri, &e));
                continue;
            }
            fresh.extend(chunks.into_iter().filter_map(|mut chunk| {
                let embedding = chunk.embedding.take()?;
                Some(IndexEntry::from_chunk(&chunk, embedding))
            }));
            accepted.push(document);
        }

        let (current_version, current) = self.index.snapshot();
        if accepted.is_empty() {
            return Ok(IngestSummary {
                index_version: current_version,
                documents: Vec::new(),
                entries: current.len(),
                failures,
            });
        }

        let ids: BTreeSet<&str> = accepted.iter().map(|d| d.id.as_str()).collect();
        let uris: BTreeSet<&str> = accepted.iter().map(|d| d.source_uri.as_str()).collect();
        let kept = current.entries().iter().filter(|entry| {
            !ids.contains(entry.metadata.document_id.as_str())
                && !uris.contains(entry.metadata.source_uri.as_str())
        });
        let replaced = current.len() - kept.clone().count();

        let index = VectorIndex::build(kept.cloned().chain(fresh), self.embedder.model_id())?;
        let entries = index.len();
        let index_version = self.index.swap(index);
        info!(
            documents = accepted.len(),
            replaced_entries = replaced,
            entries,
            index_version,
            "indexed documents"
        );
        Ok(IngestSummary {
            index_version,
            documents: accepted.iter().map(|d| d.id.clone()).collect(),
            entries,
            failures,
        })
    }

    /// Load a persisted index and make it active.
    ///
    /// The index's dimension becomes the embedder's expected dimension.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexIncompatible`] when the index was built with
    /// another embedding model or dimension, and I/O or serialization errors
    /// when it cannot be read.
    pub async fn load_index(&self, dir: impl AsRef<Path>) -> Result<u64> {
        let dir = dir.as_ref();
        let _guard = self.rebuild.lock().await;
        let index = VectorIndex::load(dir, self.embedder.model_id(), self.embedder.dimension())?;
        self.embedder.check_dimension(index.dimension())?;
        let version = self.index.swap(index);
        self.index.set_location(dir);
        Ok(version)
    }

    /// Persist the active index to `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyIndex`] when nothing has been ingested, and
    /// I/O errors when the files cannot be written.
    pub async fn persist_index(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        let _guard = self.rebuild.lock().await;
        self.index.current().persist(dir)?;
        self.index.set_location(dir);
        Ok(())
    }

    /// Answer `query` with the configured defaults.
    ///
    /// Never fails: an unrecoverable error yields the labelled
    /// "unable to answer" response.
    pub async fn ask(&self, query: &str) -> AskResponse {
        self.ask_with(query, &AskOptions::default(), &CancellationToken::new()).await
    }

    /// Answer `query` with per-request options and cancellation.
    ///
    /// Retrieval failures, generation timeouts and unavailable providers
    /// produce a response whose answer status is
    /// [`Unavailable`](crate::AnswerStatus::Unavailable) and whose `error`
    /// names the cause. This is distinct from an insufficient-evidence answer.
    #[instrument(name = "rag.ask", skip_all, fields(request.id, index.version, status))]
    pub async fn ask_with(
        &self,
        query: &str,
        options: &AskOptions,
        cancel: &CancellationToken,
    ) -> AskResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (index_version, index) = self.index.snapshot();
        let span = Span::current();
        span.record("request.id", request_id.as_str());
        span.record("index.version", index_version);

        let top_k = options.top_k.unwrap_or(self.config.retrieval.top_k);
        let mut response = AskResponse {
            request_id,
            query: query.to_string(),
            index_version,
            retrieved: Vec::new(),
            answer: GroundedAnswer::unable_to_answer(),
            error: None,
        };

        match self
            .retriever
            .retrieve_in(&index, &response.request_id, query, top_k, options.filter.as_ref())
            .await
        {
            Ok(retrieved) => response.retrieved = retrieved,
            Err(e) => return Self::unable(response, &e),
        }
        match self
            .generator
            .answer_with(&response.request_id, query, &response.retrieved, cancel)
            .await
        {
            Ok(answer) => response.answer = answer,
            Err(e) => return Self::unable(response, &e),
        }
        span.record("status", response.answer.status.as_str());
        response
    }

    fn unable(mut response: AskResponse, error: &RagError) -> AskResponse {
        error!(request.id = %response.request_id, error = %error, "unable to answer");
        Span::current().record("status", "unavailable");
        response.answer = GroundedAnswer::unable_to_answer();
        response.error = Some(error.kind());
        response
    }
}

/// Builder for constructing a [`RagService`].
///
/// The embedding and generation providers are required. Without a chunker a
/// [`TextChunker`] over the configured chunking section is used; without an
/// index the service starts empty.
#[derive(Default)]
pub struct RagServiceBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    generation_provider: Option<Arc<dyn GenerationProvider>>,
    chunker: Option<Arc<dyn Chunker>>,
    reranker: Option<Arc<dyn Reranker>>,
    emitter: Option<TraceEmitter>,
    index: Option<VectorIndex>,
}

impl RagServiceBuilder {
    /// Set the service configuration. Defaults to [`RagConfig::default`].
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the generation provider.
    pub fn generation_provider(mut self, provider: Arc<dyn GenerationProvider>) -> Self {
        self.generation_provider = Some(provider);
        self
    }

    /// Set the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Replace the reranker chosen from the retrieval configuration.
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Send trace events through `emitter`.
    pub fn emitter(mut self, emitter: TraceEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Start with `index` active.
    pub fn index(mut self, index: VectorIndex) -> Self {
        self.index = Some(index);
        self
    }

    /// Build the [`RagService`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a provider is missing, the
    /// configuration is invalid, or the initial index was built with another
    /// embedding model.
    pub fn build(self) -> Result<RagService> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let generation_provider = self
            .generation_provider
            .ok_or_else(|| RagError::ConfigError("generation_provider is required".to_string()))?;
        let chunker: Arc<dyn Chunker> = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::new(TextChunker::new(config.chunking.clone())?),
        };
        let emitter = self.emitter.unwrap_or_else(TraceEmitter::disabled);

        let embedder = Arc::new(Embedder::new(embedding_provider, config.embedding.clone()));
        let index = self.index.unwrap_or_else(|| VectorIndex::empty(embedder.model_id()));
        if index.manifest().embedding_model != embedder.model_id() {
            return Err(RagError::ConfigError(format!(
                "index was built with '{}' but the embedding provider is '{}'",
                index.manifest().embedding_model,
                embedder.model_id()
            )));
        }
        if !index.is_empty() {
            embedder.check_dimension(index.dimension())?;
        }
        let index = Arc::new(IndexHandle::new(index));

        let mut retriever =
            Retriever::new(Arc::clone(&embedder), Arc::clone(&index), config.retrieval.clone())
                .with_emitter(emitter.clone());
        if let Some(reranker) = self.reranker {
            retriever = retriever.with_reranker(reranker);
        }
        let generator = GroundedGenerator::new(generation_provider, config.generation.clone())
            .with_emitter(emitter.clone());

        Ok(RagService {
            config,
            embedder,
            chunker,
            index,
            retriever,
            generator,
            emitter,
            rebuild: Mutex::new(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::ProviderError;
    use crate::extractive::ExtractiveGenerator;
    use crate::generator::AnswerStatus;
    use crate::hashing::HashingEmbedder;
    use crate::retry::RetryPolicy;

    struct Unreachable;

    #[async_trait]
    impl EmbeddingProvider for Unreachable {
        async fn embed_batch(
            &self,
            _texts: &[&str],
        ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            Err(ProviderError::Transport("connection refused".into()))
        }

        fn name(&self) -> &str {
            "unreachable"
        }
    }

    fn service() -> RagService {
        service_with_dim(128)
    }

    #[tokio::test]
    async fn ingest_then_ask_cites_retrieved_chunk() {
        let service = service();
        let summary = service
            .ingest_documents(&[
                Document::new("paris", "Paris is the capital of France."),
                Document::new("tokyo", "Tokyo is the capital of Japan."),
            ])
            .await
            .unwrap();
        assert_eq!(summary.index_version, 2);
        assert_eq!(summary.entries, 2);

        let response = service.ask("What is the capital of France?").await;
        assert!(!response.is_unable_to_answer());
        assert_eq!(response.answer.status, AnswerStatus::Grounded);
        assert_eq!(response.retrieved[0].chunk.document_id, "paris");
        let retrieved: BTreeSet<&str> =
            response.retrieved.iter().map(|r| r.chunk.id.as_str()).collect();
        assert!(response.answer.citations.iter().all(|c| retrieved.contains(c.chunk_id.as_str())));
    }

    #[tokio::test]
    async fn reingesting_a_source_replaces_its_entries() {
        let service = service();
        let first = Document::new("notes-v1", "The launch is in May.").with_source_uri("notes.txt");
        let second =
            Document::new("notes-v2", "The launch moved to June.").with_source_uri("notes.txt");
        service.ingest_documents(&[first]).await.unwrap();
        let summary = service.ingest_documents(&[second]).await.unwrap();

        assert_eq!(summary.entries, 1);
        let index = service.index().current();
        assert_eq!(index.entries()[0].metadata.document_id, "notes-v2");
    }

    #[tokio::test]
    async fn source_metadata_does_not_hide_entries_from_replacement() {
        let service = service();
        let first = Document::new("v1", "The launch is in May.")
            .with_source_uri("notes.txt")
            .with_metadata("source", "Wiki");
        let second = Document::new("v2", "The launch moved to June.").with_source_uri("notes.txt");
        service.ingest_documents(&[first]).await.unwrap();
        let summary = service.ingest_documents(&[second]).await.unwrap();
        assert_eq!(summary.entries, 1);

        let options = AskOptions {
            top_k: Some(5),
            filter: Some(RetrievalFilter::default().with_source("notes.txt")),
        };
        let response =
            service.ask_with("When is the launch?", &options, &CancellationToken::new()).await;
        let documents: Vec<&str> =
            response.retrieved.iter().map(|r| r.chunk.document_id.as_str()).collect();
        assert_eq!(documents, vec!["v2"]);
    }

    #[tokio::test]
    async fn embedding_outage_yields_unable_to_answer() {
        let mut config = RagConfig::default();
        config.embedding.retry = RetryPolicy::none();
        let service = RagService::builder()
            .config(config)
            .embedding_provider(Arc::new(Unreachable))
            .generation_provider(Arc::new(ExtractiveGenerator::new()))
            .index(
                VectorIndex::build(
                    [IndexEntry::from_chunk(
                        &TextChunker::new(Default::default())
                            .unwrap()
                            .chunk(&Document::new("d", "Some text."))[0],
                        vec![1.0, 0.0],
                    )],
                    "unreachable",
                )
                .unwrap(),
            )
            .build()
            .unwrap();

        let response = service.ask("anything").await;
        assert!(response.is_unable_to_answer());
        assert_eq!(response.error, Some(ErrorKind::EmbeddingUnavailable));
        assert_eq!(response.answer.status, AnswerStatus::Unavailable);
        assert_ne!(response.answer.text, crate::INSUFFICIENT_EVIDENCE_ANSWER);
    }

    #[tokio::test]
    async fn failed_documents_are_reported_without_swapping() {
        let mut config = RagConfig::default();
        config.embedding.retry = RetryPolicy::none();
        let service = RagService::builder()
            .config(config)
            .embedding_provider(Arc::new(Unreachable))
            .generation_provider(Arc::new(ExtractiveGenerator::new()))
            .build()
            .unwrap();

        let summary =
            service.ingest_documents(&[Document::new("d", "Some text.")]).await.unwrap();
        assert_eq!(summary.index_version, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].kind, ErrorKind::EmbeddingUnavailable);
    }

    #[tokio::test]
    async fn persisted_index_loads_into_a_fresh_service() {
        let dir = tempfile::tempdir().unwrap();
        let service = service();
        service
            .ingest_documents(&[Document::new("paris", "Paris is the capital of France.")])
            .await
            .unwrap();
        service.persist_index(dir.path()).await.unwrap();

        let restored = service_with_dim(128);
        let version = restored.load_index(dir.path()).await.unwrap();
        assert_eq!(version, 2);
        assert_eq!(restored.embedder().dimension(), Some(128));
        assert_eq!(restored.index().location().as_deref(), Some(dir.path()));

        let err = service_with_dim(64).load_index(dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexIncompatible);
    }

    fn service_with_dim(dimension: usize) -> RagService {
        RagService::builder()
            .embedding_provider(Arc::new(HashingEmbedder::new(dimension)))
            .generation_provider(Arc::new(ExtractiveGenerator::new()))
            .build()
            .unwrap()
    }
}
