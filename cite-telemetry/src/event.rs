//! Structured trace events emitted by the pipeline stages.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A pipeline stage that produces trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Document loading, chunking, embedding and index building.
    Ingestion,
    /// Query embedding, index search, filtering and re-ranking.
    Retrieval,
    /// Prompt construction, model call and citation validation.
    Generation,
    /// One record of an evaluation run.
    Evaluation,
}

impl Stage {
    /// Stable lowercase name, also used as the span name suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::Retrieval => "retrieval",
            Self::Generation => "generation",
            Self::Evaluation => "evaluation",
        }
    }
}

/// Whether an event opens or closes a stage span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// The stage started.
    Start,
    /// The stage finished (successfully or not).
    End,
}

/// Token counters reported by a model provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens produced by the completion.
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Sum of prompt and completion tokens.
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// A structured span-start or span-end event keyed by request id.
///
/// Events are plain data so that any [`TraceSink`](crate::TraceSink) can
/// serialise or forward them.
///
/// # Example
///
/// ```rust,ignore
/// let event = TraceEvent::start("req-1", Stage::Retrieval)
///     .with_attribute("query", "capital of France");
/// emitter.emit(event);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Identifier shared by all events of one request or eval record.
    pub request_id: String,
    /// The stage this event belongs to.
    pub stage: Stage,
    /// Start or end of the stage.
    pub phase: Phase,
    /// Wall-clock time the event was created.
    pub timestamp: DateTime<Utc>,
    /// Stage-specific attributes (query, chunk ids, outcome, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    /// Token counters, when the stage called a model that reports them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl TraceEvent {
    fn new(request_id: impl Into<String>, stage: Stage, phase: Phase) -> Self {
        Self {
            request_id: request_id.into(),
            stage,
            phase,
            timestamp: Utc::now(),
            attributes: BTreeMap::new(),
            usage: None,
        }
    }

    /// Create a span-start event.
    pub fn start(request_id: impl Into<String>, stage: Stage) -> Self {
        Self::new(request_id, stage, Phase::Start)
    }

    /// Create a span-end event.
    pub fn end(request_id: impl Into<String>, stage: Stage) -> Self {
        Self::new(request_id, stage, Phase::End)
    }

    /// Attach an attribute. Later values for the same key overwrite earlier ones.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Attach token counters.
    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.usage = usage;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_snake_case_stage_and_phase() {
        let event = TraceEvent::end("req-7", Stage::Generation)
            .with_attribute("outcome", "grounded")
            .with_usage(Some(TokenUsage { prompt_tokens: 12, completion_tokens: 3 }));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["stage"], "generation");
        assert_eq!(json["phase"], "end");
        assert_eq!(json["attributes"]["outcome"], "grounded");
        assert_eq!(json["usage"]["prompt_tokens"], 12);
    }

    #[test]
    fn omits_empty_attributes_and_usage() {
        let json = serde_json::to_string(&TraceEvent::start("req-1", Stage::Retrieval)).unwrap();
        assert!(!json.contains("attributes"));
        assert!(!json.contains("usage"));
    }

    #[test]
    fn usage_total_saturates() {
        let usage = TokenUsage { prompt_tokens: u32::MAX, completion_tokens: 5 };
        assert_eq!(usage.total(), u32::MAX);
    }
}
