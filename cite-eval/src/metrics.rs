//! Retrieval and answer-quality metrics.

use std::collections::{BTreeMap, BTreeSet};

use cite_rag::RetrievedChunk;
use cite_rag::citation::parse_markers;
use cite_rag::text::words;
use serde::{Deserialize, Serialize};

/// How expected ids are compared with retrieved chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// An expected id matches only a chunk with that id.
    #[default]
    Exact,
    /// An expected id matches a chunk with that id or any chunk of the
    /// document with that id.
    ChunkOrDocument,
}

impl MatchMode {
    fn matches(&self, expected: &str, retrieved: &RetrievedChunk) -> bool {
        retrieved.chunk.id == expected
            || (*self == Self::ChunkOrDocument && retrieved.chunk.document_id == expected)
    }
}

/// Fraction of distinct expected ids matched by the first `k` retrieved chunks.
///
/// `None` when nothing is expected.
pub fn recall_at_k(
    retrieved: &[RetrievedChunk],
    expected: &[String],
    k: usize,
    mode: MatchMode,
) -> Option<f64> {
    let expected: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
    if expected.is_empty() {
        return None;
    }
    let top = &retrieved[..k.min(retrieved.len())];
    let hits = expected
        .iter()
        .filter(|id| top.iter().any(|r| mode.matches(id, r)))
        .count();
    Some(hits as f64 / expected.len() as f64)
}

/// Reciprocal of the rank of the first retrieved chunk matching any expected id.
///
/// `None` when nothing is expected, `0.0` when nothing matches.
pub fn reciprocal_rank(
    retrieved: &[RetrievedChunk],
    expected: &[String],
    mode: MatchMode,
) -> Option<f64> {
    if expected.is_empty() {
        return None;
    }
    let position = retrieved
        .iter()
        .position(|r| expected.iter().any(|id| mode.matches(id, r)));
    Some(position.map_or(0.0, |p| 1.0 / (p + 1) as f64))
}

fn strip_markers(text: &str) -> String {
    let mut stripped = String::with_capacity(text.len());
    let mut last = 0;
    for marker in parse_markers(text) {
        stripped.push_str(&text[last..marker.span.start]);
        stripped.push(' ');
        last = marker.span.end;
    }
    stripped.push_str(&text[last..]);
    stripped
}

fn bag(text: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for word in words(&strip_markers(text)) {
        *counts.entry(word).or_insert(0) += 1;
    }
    counts
}

/// Word-overlap F1 between an answer and a golden answer.
///
/// Citation markers are ignored. Two texts without words score `1.0`; one
/// empty side scores `0.0`.
pub fn token_f1(answer: &str, golden: &str) -> f64 {
    let predicted = bag(answer);
    let reference = bag(golden);
    let predicted_total: usize = predicted.values().sum();
    let reference_total: usize = reference.values().sum();
    if predicted_total == 0 && reference_total == 0 {
        return 1.0;
    }
    if predicted_total == 0 || reference_total == 0 {
        return 0.0;
    }
    let common: usize = predicted
        .iter()
        .map(|(word, n)| reference.get(word).map_or(0, |m| (*n).min(*m)))
        .sum();
    if common == 0 {
        return 0.0;
    }
    let precision = common as f64 / predicted_total as f64;
    let recall = common as f64 / reference_total as f64;
    2.0 * precision * recall / (precision + recall)
}

/// Case-insensitive word-sequence equality, with citation markers and
/// punctuation removed.
pub fn exact_match(answer: &str, golden: &str) -> bool {
    let normalize = |text: &str| words(&strip_markers(text)).join(" ");
    normalize(answer) == normalize(golden)
}

/// Arithmetic mean of the present values, in order. `None` when none are present.
pub fn mean(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cite_rag::Chunk;

    fn hit(id: &str, document_id: &str, rank: usize) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                id: id.to_string(),
                document_id: document_id.to_string(),
                text: String::new(),
                start_offset: 0,
                end_offset: 1,
                embedding: None,
                truncated: false,
                metadata: Default::default(),
            },
            score: 1.0 / rank as f32,
            rank,
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn recall_counts_distinct_expected_ids_in_top_k() {
        let retrieved = vec![hit("a:0-5", "a", 1), hit("b:0-5", "b", 2), hit("c:0-5", "c", 3)];
        let expected = ids(&["c:0-5", "a:0-5", "a:0-5", "z:0-5"]);
        assert_eq!(recall_at_k(&retrieved, &expected, 3, MatchMode::Exact), Some(2.0 / 3.0));
        assert_eq!(recall_at_k(&retrieved, &expected, 1, MatchMode::Exact), Some(1.0 / 3.0));
        assert_eq!(recall_at_k(&retrieved, &[], 3, MatchMode::Exact), None);
    }

    #[test]
    fn reciprocal_rank_uses_first_match() {
        let retrieved = vec![hit("a:0-5", "a", 1), hit("b:0-5", "b", 2)];
        assert_eq!(reciprocal_rank(&retrieved, &ids(&["b:0-5"]), MatchMode::Exact), Some(0.5));
        assert_eq!(reciprocal_rank(&retrieved, &ids(&["x"]), MatchMode::Exact), Some(0.0));
        assert_eq!(reciprocal_rank(&retrieved, &[], MatchMode::Exact), None);
    }

    #[test]
    fn document_ids_match_in_chunk_or_document_mode() {
        let retrieved = vec![hit("a:0-5", "a", 1), hit("b:6-9", "b", 2)];
        let expected = ids(&["b"]);
        assert_eq!(reciprocal_rank(&retrieved, &expected, MatchMode::Exact), Some(0.0));
        assert_eq!(reciprocal_rank(&retrieved, &expected, MatchMode::ChunkOrDocument), Some(0.5));
    }

    #[test]
    fn f1_ignores_markers_and_case() {
        assert_eq!(token_f1("Paris is the capital [1].", "paris is the capital"), 1.0);
        let partial = token_f1("Paris", "Paris France");
        assert!((partial - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(token_f1("Tokyo", "Paris"), 0.0);
        assert_eq!(token_f1("", "Paris"), 0.0);
    }

    #[test]
    fn exact_match_normalizes() {
        assert!(exact_match("  Paris [1] ", "paris"));
        assert!(!exact_match("Paris, France", "Paris"));
    }

    #[test]
    fn mean_skips_missing_values() {
        assert_eq!(mean([Some(1.0), None, Some(0.0)]), Some(0.5));
        assert_eq!(mean([None, None]), None);
    }
}
