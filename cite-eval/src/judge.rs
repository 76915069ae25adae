//! Model-graded answer scoring.

use std::sync::Arc;

use async_trait::async_trait;
use cite_rag::{GenerationProvider, GenerationRequest, RetrievedChunk};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EvalError, Result};

const JUDGE_SYSTEM: &str = "You are an impartial judge evaluating a RAG system.
Given the QUESTION, CONTEXT, and ANSWER, evaluate:
1. Grounding: Is the answer fully supported by the context? (1-5)
2. Correctness: Does the answer answer the question? (1-5)

Output JSON: {\"grounding\": int, \"correctness\": int, \"reasoning\": \"string\"}";

/// Scores assigned by a [`Judge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeScores {
    /// How fully the context supports the answer, 1 to 5.
    pub grounding: u8,
    /// How well the answer addresses the question, 1 to 5.
    pub correctness: u8,
    /// The judge's explanation.
    #[serde(default)]
    pub reasoning: String,
}

/// Grades an answer against the question and the passages it was drawn from.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Score `answer`.
    async fn judge(
        &self,
        question: &str,
        context: &[RetrievedChunk],
        answer: &str,
    ) -> Result<JudgeScores>;
}

/// A [`Judge`] backed by a chat model that replies in JSON.
pub struct LlmJudge {
    provider: Arc<dyn GenerationProvider>,
}

impl LlmJudge {
    /// Create a judge that asks `provider`.
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self { provider }
    }
}

impl std::fmt::Debug for LlmJudge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmJudge").field("provider", &self.provider.name()).finish()
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(
        &self,
        question: &str,
        context: &[RetrievedChunk],
        answer: &str,
    ) -> Result<JudgeScores> {
        let context = context.iter().map(|r| r.chunk.text.as_str()).collect::<Vec<_>>().join("\n");
        let request = GenerationRequest {
            system: JUDGE_SYSTEM.to_string(),
            prompt: format!("QUESTION: {question}\nCONTEXT: {context}\nANSWER: {answer}"),
            question: question.to_string(),
            passages: Vec::new(),
            temperature: 0.0,
            max_output_tokens: Some(512),
        };
        let output = self
            .provider
            .generate(&request)
            .await
            .map_err(|e| EvalError::JudgeError(e.to_string()))?;
        debug!(provider = self.provider.name(), "judge replied");
        parse_scores(&output.text)
    }
}

/// Read judge scores from a reply, tolerating text around the JSON object.
///
/// # Errors
///
/// Returns [`EvalError::JudgeError`] when no JSON object can be read or a
/// score lies outside 1 to 5.
pub fn parse_scores(reply: &str) -> Result<JudgeScores> {
    let object = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => &reply[start..=end],
        _ => return Err(EvalError::JudgeError("reply contains no JSON object".to_string())),
    };
    let scores: JudgeScores = serde_json::from_str(object)
        .map_err(|e| EvalError::JudgeError(format!("unreadable reply: {e}")))?;
    for (name, value) in [("grounding", scores.grounding), ("correctness", scores.correctness)] {
        if !(1..=5).contains(&value) {
            return Err(EvalError::JudgeError(format!("{name} score {value} is outside 1-5")));
        }
    }
    Ok(scores)
}
