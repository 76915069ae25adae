//! Reranker trait for re-scoring retrieval candidates.

use async_trait::async_trait;

use crate::document::RetrievedChunk;
use crate::error::Result;
use crate::text;

/// A reranker that re-scores retrieval candidates.
///
/// Implementations may reorder, rescore or drop candidates. The retriever
/// sorts, deduplicates and ranks whatever is returned, so implementations
/// need not keep the input order.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rerank candidates given the original query.
    async fn rerank(
        &self,
        query: &str,
        results: Vec<RetrievedChunk>,
    ) -> Result<Vec<RetrievedChunk>>;
}

/// A no-op reranker that returns results unchanged.
///
/// # Example
///
/// ```rust,ignore
/// use cite_rag::NoOpReranker;
///
/// let reranker = NoOpReranker;
/// let reranked = reranker.rerank("query", results).await?;
/// // reranked == results (same order, same scores)
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReranker;

#[async_trait]
impl Reranker for NoOpReranker {
    async fn rerank(
        &self,
        _query: &str,
        results: Vec<RetrievedChunk>,
    ) -> Result<Vec<RetrievedChunk>> {
        Ok(results)
    }
}

/// Adds `boost` to a candidate's score for every distinct query term that
/// also occurs in the chunk text.
#[derive(Debug, Clone, Copy)]
pub struct LexicalOverlapReranker {
    boost: f32,
}

impl LexicalOverlapReranker {
    /// Create a reranker adding `boost` per matched query term.
    pub fn new(boost: f32) -> Self {
        Self { boost }
    }
}

#[async_trait]
impl Reranker for LexicalOverlapReranker {
    async fn rerank(
        &self,
        query: &str,
        mut results: Vec<RetrievedChunk>,
    ) -> Result<Vec<RetrievedChunk>> {
        let query_terms = text::term_set(query);
        if query_terms.is_empty() || self.boost == 0.0 {
            return Ok(results);
        }
        for result in &mut results {
            let chunk_terms = text::term_set(&result.chunk.text);
            let matched = query_terms.intersection(&chunk_terms).count();
            result.score += self.boost * matched as f32;
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Chunk;

    fn candidate(id: &str, text: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                id: id.into(),
                document_id: "d".into(),
                text: text.into(),
                start_offset: 0,
                end_offset: text.len(),
                embedding: None,
                truncated: false,
                metadata: Default::default(),
            },
            score,
            rank: 0,
        }
    }

    #[tokio::test]
    async fn boosts_by_distinct_matched_terms() {
        let reranked = LexicalOverlapReranker::new(0.1)
            .rerank(
                "Where is the Eiffel tower?",
                vec![
                    candidate("a", "The Eiffel tower is in Paris. Eiffel!", 0.5),
                    candidate("b", "Unrelated text.", 0.5),
                ],
            )
            .await
            .unwrap();
        assert!((reranked[0].score - 0.7).abs() < 1e-6);
        assert!((reranked[1].score - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn noop_keeps_everything() {
        let input = vec![candidate("a", "x", 0.2), candidate("b", "y", 0.9)];
        assert_eq!(NoOpReranker.rerank("q", input.clone()).await.unwrap(), input);
    }
}
