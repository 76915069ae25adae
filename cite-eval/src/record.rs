//! Eval-set records and the JSONL loader.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};

/// One labelled query.
///
/// Accepts the field names `question` for `query` and `gold_sources` for
/// `expected_chunk_ids` as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalRecord {
    /// Optional identifier shown in reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The question to ask.
    #[serde(alias = "question")]
    pub query: String,
    /// Chunk ids (or document ids, see [`MatchMode`](crate::MatchMode))
    /// that should be retrieved.
    #[serde(default, alias = "gold_sources")]
    pub expected_chunk_ids: Vec<String>,
    /// Reference answer for lexical scoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub golden_answer: Option<String>,
}

impl EvalRecord {
    /// Create a record with no id, expectations or golden answer.
    pub fn new(query: impl Into<String>) -> Self {
        Self { id: None, query: query.into(), expected_chunk_ids: Vec::new(), golden_answer: None }
    }

    /// Set the identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add an expected chunk id.
    pub fn with_expected(mut self, chunk_id: impl Into<String>) -> Self {
        self.expected_chunk_ids.push(chunk_id.into());
        self
    }

    /// Set the golden answer.
    pub fn with_golden_answer(mut self, answer: impl Into<String>) -> Self {
        self.golden_answer = Some(answer.into());
        self
    }
}

/// Parse newline-delimited JSON records. Blank lines are skipped.
///
/// # Errors
///
/// Returns [`EvalError::InvalidRecord`] naming `path` and the 1-based line of
/// the first malformed record or empty query.
pub fn parse_eval_set(path: impl AsRef<Path>, content: &str) -> Result<Vec<EvalRecord>> {
    let path = path.as_ref();
    let mut records = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let invalid = |message: String| EvalError::InvalidRecord {
            path: path.to_path_buf(),
            line: index + 1,
            message,
        };
        let record: EvalRecord =
            serde_json::from_str(line).map_err(|e| invalid(e.to_string()))?;
        if record.query.trim().is_empty() {
            return Err(invalid("query must not be empty".to_string()));
        }
        records.push(record);
    }
    Ok(records)
}

/// Read and parse a JSONL eval set.
///
/// # Errors
///
/// Returns [`EvalError::Io`] when the file cannot be read, otherwise see
/// [`parse_eval_set`].
pub async fn load_eval_set(path: impl AsRef<Path>) -> Result<Vec<EvalRecord>> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path).await?;
    parse_eval_set(path, &content)
}
