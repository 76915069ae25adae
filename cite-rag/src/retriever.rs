//! Query-time retrieval: embed, search, filter, re-rank, rank.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use cite_telemetry::{Stage, TraceEmitter, TraceEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{Span, debug, instrument};

use crate::config::RetrievalConfig;
use crate::document::{IndexEntry, RetrievedChunk};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::index::{IndexHandle, VectorIndex};
use crate::reranker::{LexicalOverlapReranker, NoOpReranker, Reranker};

/// Restrictions applied to index candidates before re-ranking.
///
/// Empty allow-lists are treated as "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalFilter {
    /// Only keep chunks whose source URI is listed.
    pub sources: BTreeSet<String>,
    /// Only keep chunks of the listed documents.
    pub document_ids: BTreeSet<String>,
    /// Only keep chunks whose metadata has every listed key with that value.
    pub metadata: BTreeMap<String, String>,
    /// Minimum cosine similarity, overriding the configured threshold.
    pub min_score: Option<f32>,
}

impl RetrievalFilter {
    /// Allow a source URI.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.insert(source.into());
        self
    }

    /// Allow a document id.
    pub fn with_document_id(mut self, id: impl Into<String>) -> Self {
        self.document_ids.insert(id.into());
        self
    }

    /// Require a metadata value.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Require a minimum similarity.
    pub fn with_min_score(mut self, score: f32) -> Self {
        self.min_score = Some(score);
        self
    }

    fn matches(&self, entry: &IndexEntry) -> bool {
        let meta = &entry.metadata;
        (self.sources.is_empty() || self.sources.contains(&meta.source_uri))
            && (self.document_ids.is_empty() || self.document_ids.contains(&meta.document_id))
            && self.metadata.iter().all(|(k, v)| meta.attributes.get(k) == Some(v))
    }
}

/// Turns a query into ranked, filtered chunks from the active index.
///
/// # Example
///
/// ```rust,ignore
/// let retriever = Retriever::new(embedder, index, RetrievalConfig::default());
/// let chunks = retriever.retrieve("What is the capital of France?", 3, None).await?;
/// for chunk in &chunks {
///     println!("{} {:.3} {}", chunk.rank, chunk.score, chunk.chunk.id);
/// }
/// ```
pub struct Retriever {
    embedder: Arc<Embedder>,
    index: Arc<IndexHandle>,
    reranker: Arc<dyn Reranker>,
    config: RetrievalConfig,
    emitter: TraceEmitter,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("embedder", &self.embedder)
            .field("index_version", &self.index.version())
            .field("config", &self.config)
            .finish()
    }
}

impl Retriever {
    /// Create a retriever. A [`LexicalOverlapReranker`] is installed when
    /// `config.lexical_boost` is non-zero, a [`NoOpReranker`] otherwise.
    pub fn new(embedder: Arc<Embedder>, index: Arc<IndexHandle>, config: RetrievalConfig) -> Self {
        let reranker: Arc<dyn Reranker> = if config.lexical_boost != 0.0 {
            Arc::new(LexicalOverlapReranker::new(config.lexical_boost))
        } else {
            Arc::new(NoOpReranker)
        };
        Self { embedder, index, reranker, config, emitter: TraceEmitter::disabled() }
    }

    /// Replace the reranker.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    /// Emit retrieval trace events through `emitter`.
    pub fn with_emitter(mut self, emitter: TraceEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    /// The retrieval configuration.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve up to `top_k` chunks for `query` under a fresh request id.
    ///
    /// # Errors
    ///
    /// See [`retrieve_with_id`](Retriever::retrieve_with_id).
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&RetrievalFilter>,
    ) -> Result<Vec<RetrievedChunk>> {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.retrieve_with_id(&request_id, query, top_k, filter).await
    }

    /// Retrieve up to `top_k` chunks for `query`.
    ///
    /// Results are ordered by descending score, ties by ascending chunk id,
    /// carry dense 1-based ranks and contain no duplicate chunk. No match is
    /// an empty list, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingUnavailable`](crate::RagError::EmbeddingUnavailable)
    /// or [`RagError::DimensionMismatch`](crate::RagError::DimensionMismatch)
    /// when the query cannot be embedded or compared with the index.
    pub async fn retrieve_with_id(
        &self,
        request_id: &str,
        query: &str,
        top_k: usize,
        filter: Option<&RetrievalFilter>,
    ) -> Result<Vec<RetrievedChunk>> {
        let index = self.index.current();
        self.retrieve_in(&index, request_id, query, top_k, filter).await
    }

    /// Like [`retrieve_with_id`](Retriever::retrieve_with_id), but searches
    /// `index` instead of the handle's current index. Callers holding a
    /// [`snapshot`](IndexHandle::snapshot) use this so the version they
    /// report is the one searched.
    ///
    /// # Errors
    ///
    /// As for [`retrieve_with_id`](Retriever::retrieve_with_id).
    #[instrument(
        name = "rag.retrieve",
        skip_all,
        fields(request.id = %request_id, top_k = top_k, candidate_k, results, error)
    )]
    pub async fn retrieve_in(
        &self,
        index: &VectorIndex,
        request_id: &str,
        query: &str,
        top_k: usize,
        filter: Option<&RetrievalFilter>,
    ) -> Result<Vec<RetrievedChunk>> {
        self.emitter.emit(
            TraceEvent::start(request_id, Stage::Retrieval)
                .with_attribute("query", query)
                .with_attribute("top_k", top_k),
        );

        let outcome = self.run(index, query, top_k, filter).await;
        let end = TraceEvent::end(request_id, Stage::Retrieval);
        match &outcome {
            Ok(chunks) => {
                Span::current().record("results", chunks.len());
                let ids: Vec<&str> = chunks.iter().map(|c| c.chunk.id.as_str()).collect();
                let scores: Vec<f32> = chunks.iter().map(|c| c.score).collect();
                self.emitter.emit(
                    end.with_attribute("retrieved_ids", json!(ids))
                        .with_attribute("scores", json!(scores)),
                );
                debug!(results = chunks.len(), "retrieval completed");
            }
            Err(e) => {
                Span::current().record("error", tracing::field::display(e));
                self.emitter.emit(end.with_attribute("error", e.kind().as_str()));
            }
        }
        outcome
    }

    async fn run(
        &self,
        index: &VectorIndex,
        query: &str,
        top_k: usize,
        filter: Option<&RetrievalFilter>,
    ) -> Result<Vec<RetrievedChunk>> {
        if top_k == 0 || index.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_query(query).await?;
        let candidate_k = self.config.candidate_k(top_k);
        Span::current().record("candidate_k", candidate_k);

        let threshold = filter.and_then(|f| f.min_score).or(self.config.similarity_threshold);
        let candidates: Vec<RetrievedChunk> = index
            .search(&query_vector, candidate_k)?
            .into_iter()
            .filter(|hit| threshold.is_none_or(|t| hit.score >= t))
            .filter(|hit| filter.is_none_or(|f| f.matches(hit.entry)))
            .map(|hit| {
                let mut chunk = hit.entry.to_chunk();
                chunk.embedding = None;
                RetrievedChunk { chunk, score: hit.score, rank: 0 }
            })
            .collect();
        let candidate_count = candidates.len();

        let mut ranked = self.reranker.rerank(query, candidates).await?;
        ranked.sort_by(|a, b| {
            b.score.total_cmp(&a.score).then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        let mut seen = HashSet::new();
        ranked.retain(|c| seen.insert(c.chunk.id.clone()));
        ranked.truncate(top_k);

        if let Some(budget) = self.config.token_budget {
            let mut used = 0;
            let mut keep = 0;
            for chunk in &ranked {
                let tokens = chunk.chunk.token_count();
                if keep > 0 && used + tokens > budget {
                    break;
                }
                used += tokens;
                keep += 1;
            }
            ranked.truncate(keep);
        }

        for (i, chunk) in ranked.iter_mut().enumerate() {
            chunk.rank = i + 1;
        }
        debug!(candidates = candidate_count, kept = ranked.len(), ?threshold, "ranked candidates");
        Ok(ranked)
    }
}
