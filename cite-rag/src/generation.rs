//! Generation provider trait and request/response types.

use async_trait::async_trait;
use cite_telemetry::TokenUsage;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// One retrieved chunk as presented to the model, tagged `[marker]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// 1-based tag shown to the model.
    pub marker: usize,
    /// The chunk this passage was taken from.
    pub chunk_id: String,
    /// Source URI of the chunk, shown alongside the text.
    pub source: String,
    /// The chunk text.
    pub text: String,
}

/// Everything a provider needs to produce a grounded answer.
///
/// `system` and `prompt` are ready to send to a chat model. `question` and
/// `passages` are the same content in structured form for providers that do
/// not use a language model.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// System instructions.
    pub system: String,
    /// User message: numbered passages followed by the question.
    pub prompt: String,
    /// The user's question.
    pub question: String,
    /// Passages in marker order.
    pub passages: Vec<Passage>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token cap.
    pub max_output_tokens: Option<u32>,
}

/// A provider's raw answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOutput {
    /// The answer text, citation markers included.
    pub text: String,
    /// Token counters, when the provider reports them.
    pub usage: Option<TokenUsage>,
}

/// A text generation backend.
///
/// Implementations make a single attempt per call; deadline, cancellation,
/// retries and citation checks live in
/// [`GroundedGenerator`](crate::GroundedGenerator).
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Produce an answer for `request`.
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<GenerationOutput, ProviderError>;

    /// Identifier of the provider and model.
    fn name(&self) -> &str;
}
