//! Citation-enforcing answer generation.
//!
//! [`GroundedGenerator`] prompts a [`GenerationProvider`] with numbered
//! passages, checks every citation in the reply against those passages and
//! applies the configured [`ViolationPolicy`] to answers that fail.

use std::sync::Arc;
use std::time::Instant;

use cite_telemetry::{Stage, TokenUsage, TraceEmitter, TraceEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument, warn};

use crate::citation::{self, GroundingViolation, Validation, collect_citations};
use crate::config::{GenerationConfig, ViolationPolicy};
use crate::document::{Citation, RetrievedChunk};
use crate::error::{ProviderError, RagError, Result};
use crate::generation::{GenerationOutput, GenerationProvider, GenerationRequest};
use crate::prompt;

/// Answer returned when the evidence does not support an answer.
pub const INSUFFICIENT_EVIDENCE_ANSWER: &str = "I don't know based on the provided documents.";

/// Answer returned when the request failed for reasons unrelated to the
/// evidence, such as an unreachable provider.
pub const UNABLE_TO_ANSWER: &str =
    "Unable to answer: the question could not be processed right now. Please try again later.";

/// Note appended to answers returned under [`ViolationPolicy::Flag`].
pub const UNVERIFIED_NOTE: &str =
    "Note: some statements in this answer could not be verified against the cited sources.";

/// How an answer relates to its evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    /// Every statement carries a valid citation.
    Grounded,
    /// Nothing was retrieved, or the model declined to answer.
    InsufficientEvidence,
    /// The answer failed validation and was replaced by the fallback.
    Rejected,
    /// Unverifiable sentences were removed.
    Stripped,
    /// The answer failed validation and is returned with a warning.
    Unverified,
    /// The request failed before an answer could be produced.
    Unavailable,
}

impl AnswerStatus {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Grounded => "grounded",
            Self::InsufficientEvidence => "insufficient_evidence",
            Self::Rejected => "rejected",
            Self::Stripped => "stripped",
            Self::Unverified => "unverified",
            Self::Unavailable => "unavailable",
        }
    }
}

/// A validated answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundedAnswer {
    /// Text shown to the user.
    pub text: String,
    /// Distinct citations present in `text`, ordered by marker.
    pub citations: Vec<Citation>,
    /// Outcome of validation and policy.
    pub status: AnswerStatus,
    /// Problems found in the model's raw answer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<GroundingViolation>,
    /// Citation references in the raw answer.
    pub markers_total: usize,
    /// Citation references in the raw answer that resolved to a passage.
    pub markers_valid: usize,
    /// Token counters reported by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl GroundedAnswer {
    /// The fixed answer for missing evidence.
    pub fn insufficient_evidence() -> Self {
        Self {
            text: INSUFFICIENT_EVIDENCE_ANSWER.to_string(),
            citations: Vec::new(),
            status: AnswerStatus::InsufficientEvidence,
            violations: Vec::new(),
            markers_total: 0,
            markers_valid: 0,
            usage: None,
        }
    }

    /// The labelled answer for a request that failed.
    pub fn unable_to_answer() -> Self {
        Self {
            text: UNABLE_TO_ANSWER.to_string(),
            status: AnswerStatus::Unavailable,
            ..Self::insufficient_evidence()
        }
    }

    /// Share of citation references that resolved, or `None` when the raw
    /// answer had no references.
    pub fn groundedness(&self) -> Option<f64> {
        (self.markers_total > 0).then(|| self.markers_valid as f64 / self.markers_total as f64)
    }
}

fn is_refusal(text: &str) -> bool {
    let normalized = text.trim().to_lowercase().replace('\u{2019}', "'");
    normalized.starts_with("i don't know") || normalized.starts_with("i do not know")
}

/// Generates answers that cite only the passages they were given.
///
/// # Example
///
/// ```rust,ignore
/// use cite_rag::{ExtractiveGenerator, GenerationConfig, GroundedGenerator};
///
/// let generator = GroundedGenerator::new(Arc::new(ExtractiveGenerator::new()), GenerationConfig::default());
/// let answer = generator.answer("What is the capital of France?", &retrieved).await?;
/// println!("{} ({:?})", answer.text, answer.status);
/// ```
pub struct GroundedGenerator {
    provider: Arc<dyn GenerationProvider>,
    config: GenerationConfig,
    emitter: TraceEmitter,
}

impl std::fmt::Debug for GroundedGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroundedGenerator")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .finish()
    }
}

impl GroundedGenerator {
    /// Create a generator around `provider`.
    pub fn new(provider: Arc<dyn GenerationProvider>, config: GenerationConfig) -> Self {
        Self { provider, config, emitter: TraceEmitter::disabled() }
    }

    /// Emit generation trace events through `emitter`.
    pub fn with_emitter(mut self, emitter: TraceEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    /// The generation configuration.
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Answer `query` from `retrieved` under a fresh request id, without
    /// external cancellation.
    ///
    /// # Errors
    ///
    /// See [`answer_with`](GroundedGenerator::answer_with).
    pub async fn answer(
        &self,
        query: &str,
        retrieved: &[RetrievedChunk],
    ) -> Result<GroundedAnswer> {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.answer_with(&request_id, query, retrieved, &CancellationToken::new()).await
    }

    /// Answer `query` from `retrieved`.
    ///
    /// With no retrieved chunks the provider is not called and the fixed
    /// insufficient-evidence answer is returned.
    ///
    /// # Errors
    ///
    /// - [`RagError::GenerationTimeout`] when the deadline passes or `cancel`
    ///   fires first, or the provider keeps timing out.
    /// - [`RagError::GenerationUnavailable`] when the provider fails for any
    ///   other reason after retries.
    #[instrument(
        name = "rag.generate",
        skip_all,
        fields(
            request.id = %request_id,
            passages = retrieved.len(),
            status,
            markers_total,
            markers_valid,
            error,
        )
    )]
    pub async fn answer_with(
        &self,
        request_id: &str,
        query: &str,
        retrieved: &[RetrievedChunk],
        cancel: &CancellationToken,
    ) -> Result<GroundedAnswer> {
        let retrieved_ids: Vec<&str> = retrieved.iter().map(|r| r.chunk.id.as_str()).collect();
        self.emitter.emit(
            TraceEvent::start(request_id, Stage::Generation)
                .with_attribute("query", query)
                .with_attribute("retrieved_ids", json!(retrieved_ids)),
        );

        if retrieved.is_empty() {
            let answer = GroundedAnswer::insufficient_evidence();
            self.finish(request_id, None, &answer);
            return Ok(answer);
        }

        let request = prompt::build_request(query, retrieved, &self.config);
        let output = match self.call_provider(&request, cancel).await {
            Ok(output) => output,
            Err(e) => {
                Span::current().record("error", tracing::field::display(&e));
                self.emitter.emit(
                    TraceEvent::end(request_id, Stage::Generation)
                        .with_attribute("error", e.kind().as_str()),
                );
                return Err(e);
            }
        };

        let validation = citation::validate(
            &output.text,
            &request.passages,
            self.config.require_sentence_citations,
        );
        let mut answer = self.apply_policy(&output.text, &validation);
        answer.usage = output.usage;
        self.finish(request_id, Some(&output.text), &answer);
        Ok(answer)
    }

    async fn call_provider(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput> {
        let started = Instant::now();
        let provider = self.provider.as_ref();
        let call = self.config.retry.run("generate", move |attempt| {
            debug!(attempt, provider = provider.name(), "calling generation provider");
            provider.generate(request)
        });

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(elapsed_ms = started.elapsed().as_millis() as u64, "generation cancelled");
                return Err(RagError::GenerationTimeout { elapsed: started.elapsed() });
            }
            outcome = tokio::time::timeout(self.config.timeout(), call) => outcome,
        };

        match outcome {
            Err(_) => {
                warn!(timeout_ms = self.config.timeout_ms, "generation deadline exceeded");
                Err(RagError::GenerationTimeout { elapsed: started.elapsed() })
            }
            Ok(Err(failure)) => match failure.error {
                ProviderError::Timeout(_) => {
                    Err(RagError::GenerationTimeout { elapsed: started.elapsed() })
                }
                error => Err(RagError::GenerationUnavailable {
                    provider: provider.name().to_string(),
                    attempts: failure.attempts,
                    message: error.to_string(),
                }),
            },
            Ok(Ok(output)) => Ok(output),
        }
    }

    fn apply_policy(&self, raw: &str, validation: &Validation) -> GroundedAnswer {
        let mut answer = GroundedAnswer {
            text: raw.trim().to_string(),
            citations: validation.citations(),
            status: AnswerStatus::Grounded,
            violations: Vec::new(),
            markers_total: validation.markers_total,
            markers_valid: validation.markers_valid,
            usage: None,
        };

        if is_refusal(raw) {
            answer.text = INSUFFICIENT_EVIDENCE_ANSWER.to_string();
            answer.citations.clear();
            answer.status = AnswerStatus::InsufficientEvidence;
            return answer;
        }
        if validation.is_clean() {
            return answer;
        }

        answer.violations = validation.violations();
        match self.config.violation_policy {
            ViolationPolicy::Reject => {
                answer.text = INSUFFICIENT_EVIDENCE_ANSWER.to_string();
                answer.citations.clear();
                answer.status = AnswerStatus::Rejected;
            }
            ViolationPolicy::Strip => {
                let kept: Vec<_> =
                    validation.sentences.iter().filter(|s| s.violations.is_empty()).collect();
                let text = kept
                    .iter()
                    .map(|s| raw[s.range.clone()].trim())
                    .collect::<Vec<_>>()
                    .join(" ");
                if text.is_empty() {
                    answer.text = INSUFFICIENT_EVIDENCE_ANSWER.to_string();
                    answer.citations.clear();
                } else {
                    answer.text = text;
                    answer.citations = collect_citations(kept.into_iter());
                }
                answer.status = AnswerStatus::Stripped;
            }
            ViolationPolicy::Flag => {
                answer.text = format!("{}\n\n{UNVERIFIED_NOTE}", answer.text);
                answer.status = AnswerStatus::Unverified;
            }
        }
        answer
    }

    fn finish(&self, request_id: &str, raw: Option<&str>, answer: &GroundedAnswer) {
        let span = Span::current();
        span.record("status", answer.status.as_str());
        span.record("markers_total", answer.markers_total);
        span.record("markers_valid", answer.markers_valid);
        if answer.violations.is_empty() {
            info!(
                status = answer.status.as_str(),
                citations = answer.citations.len(),
                "answer ready"
            );
        } else {
            warn!(
                status = answer.status.as_str(),
                violations = answer.violations.len(),
                policy = ?self.config.violation_policy,
                "answer failed citation checks"
            );
        }

        let citations: Vec<&str> = answer.citations.iter().map(|c| c.chunk_id.as_str()).collect();
        let mut event = TraceEvent::end(request_id, Stage::Generation)
            .with_attribute("outcome", answer.status.as_str())
            .with_attribute("answer", answer.text.as_str())
            .with_attribute("citations", json!(citations))
            .with_attribute("violations", answer.violations.len())
            .with_usage(answer.usage);
        if let Some(raw) = raw {
            event = event.with_attribute("raw_answer", raw);
        }
        self.emitter.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::document::Chunk;
    use crate::retry::RetryPolicy;

    struct Canned {
        reply: String,
        calls: AtomicU32,
        delay: Duration,
    }

    impl Canned {
        fn new(reply: &str) -> Self {
            Self { reply: reply.into(), calls: AtomicU32::new(0), delay: Duration::ZERO }
        }
    }

    #[async_trait]
    impl GenerationProvider for Canned {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> std::result::Result<GenerationOutput, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(GenerationOutput {
                text: self.reply.clone(),
                usage: Some(TokenUsage { prompt_tokens: 10, completion_tokens: 5 }),
            })
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn retrieved() -> Vec<RetrievedChunk> {
        vec![RetrievedChunk {
            chunk: Chunk {
                id: "paris:0-31".into(),
                document_id: "paris".into(),
                text: "Paris is the capital of France.".into(),
                start_offset: 0,
                end_offset: 31,
                embedding: None,
                truncated: false,
                metadata: Default::default(),
            },
            score: 0.9,
            rank: 1,
        }]
    }

    fn generator(reply: &str, policy: ViolationPolicy) -> (Arc<Canned>, GroundedGenerator) {
        let provider = Arc::new(Canned::new(reply));
        let config = GenerationConfig {
            violation_policy: policy,
            retry: RetryPolicy::none(),
            ..GenerationConfig::default()
        };
        (provider.clone(), GroundedGenerator::new(provider, config))
    }

    #[tokio::test]
    async fn empty_retrieval_skips_provider() {
        let (provider, generator) = generator("unused", ViolationPolicy::Reject);
        let answer = generator.answer("anything", &[]).await.unwrap();
        assert_eq!(answer.text, INSUFFICIENT_EVIDENCE_ANSWER);
        assert_eq!(answer.status, AnswerStatus::InsufficientEvidence);
        assert!(answer.citations.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn grounded_answer_passes_through() {
        let (_, generator) =
            generator("Paris is the capital of France [1].", ViolationPolicy::Reject);
        let answer = generator.answer("capital?", &retrieved()).await.unwrap();
        assert_eq!(answer.status, AnswerStatus::Grounded);
        assert_eq!(answer.citations, vec![Citation { marker: 1, chunk_id: "paris:0-31".into() }]);
        assert_eq!(answer.groundedness(), Some(1.0));
        assert_eq!(answer.usage.map(|u| u.total()), Some(15));
    }

    #[tokio::test]
    async fn reject_policy_replaces_bad_answers() {
        let (_, generator) = generator("Paris [1]. Berlin [2].", ViolationPolicy::Reject);
        let answer = generator.answer("capital?", &retrieved()).await.unwrap();
        assert_eq!(answer.status, AnswerStatus::Rejected);
        assert_eq!(answer.text, INSUFFICIENT_EVIDENCE_ANSWER);
        assert!(answer.citations.is_empty());
        assert_eq!(answer.groundedness(), Some(0.5));
    }

    #[tokio::test]
    async fn strip_policy_keeps_verified_sentences() {
        let (_, generator) = generator("Paris [1]. Berlin [2].", ViolationPolicy::Strip);
        let answer = generator.answer("capital?", &retrieved()).await.unwrap();
        assert_eq!(answer.status, AnswerStatus::Stripped);
        assert_eq!(answer.text, "Paris [1].");
        assert_eq!(answer.citations.len(), 1);
    }

    #[tokio::test]
    async fn flag_policy_marks_answer_unverified() {
        let (_, generator) = generator("Paris is lovely.", ViolationPolicy::Flag);
        let answer = generator.answer("capital?", &retrieved()).await.unwrap();
        assert_eq!(answer.status, AnswerStatus::Unverified);
        assert!(answer.text.ends_with(UNVERIFIED_NOTE));
        assert_eq!(answer.groundedness(), None);
    }

    #[tokio::test]
    async fn refusal_maps_to_insufficient_evidence() {
        let (_, generator) = generator(INSUFFICIENT_EVIDENCE_ANSWER, ViolationPolicy::Reject);
        let answer = generator.answer("capital?", &retrieved()).await.unwrap();
        assert_eq!(answer.status, AnswerStatus::InsufficientEvidence);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_surfaces_as_timeout() {
        let provider =
            Arc::new(Canned { delay: Duration::from_secs(30), ..Canned::new("late [1].") });
        let config = GenerationConfig { timeout_ms: 1_000, ..GenerationConfig::default() };
        let generator = GroundedGenerator::new(provider, config);
        let err = generator.answer("capital?", &retrieved()).await.unwrap_err();
        assert!(matches!(err, RagError::GenerationTimeout { .. }));
    }

    #[tokio::test]
    async fn cancellation_surfaces_as_timeout() {
        let provider =
            Arc::new(Canned { delay: Duration::from_secs(30), ..Canned::new("late [1].") });
        let generator = GroundedGenerator::new(provider, GenerationConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err =
            generator.answer_with("req", "capital?", &retrieved(), &cancel).await.unwrap_err();
        assert!(matches!(err, RagError::GenerationTimeout { .. }));
    }
}
