//! Concurrent, order-preserving evaluation runs.

use std::sync::Arc;

use cite_rag::{
    AnswerStatus, Citation, ErrorKind, GroundedAnswer, RagError, RagService, RetrievedChunk,
};
use cite_telemetry::{Stage, TraceEmitter, TraceEvent};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, instrument, warn};

use crate::judge::{Judge, JudgeScores};
use crate::metrics::{self, MatchMode};
use crate::record::EvalRecord;

/// Settings for an evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Chunks retrieved per record; also the `k` of Recall@k.
    pub top_k: usize,
    /// Records evaluated at the same time.
    pub concurrency: usize,
    /// How expected ids are matched.
    pub match_mode: MatchMode,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self { top_k: 5, concurrency: 4, match_mode: MatchMode::Exact }
    }
}

/// Whether a record was fully evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Retrieval and generation both succeeded; metrics are filled in.
    Completed,
    /// Retrieval or generation failed; see [`RecordResult::error`].
    Failed,
}

/// One retrieved chunk as shown in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedHit {
    /// Identifier of the retrieved chunk.
    pub chunk_id: String,
    /// The chunk's parent document.
    pub document_id: String,
    /// Final retrieval score after re-ranking.
    pub score: f32,
    /// 1-based rank.
    pub rank: usize,
}

impl From<&RetrievedChunk> for RetrievedHit {
    fn from(retrieved: &RetrievedChunk) -> Self {
        Self {
            chunk_id: retrieved.chunk.id.clone(),
            document_id: retrieved.chunk.document_id.clone(),
            score: retrieved.score,
            rank: retrieved.rank,
        }
    }
}

/// Per-record scores. Absent values were not applicable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetrics {
    /// Present when the record lists expected ids.
    pub recall_at_k: Option<f64>,
    /// Present when the record lists expected ids.
    pub reciprocal_rank: Option<f64>,
    /// Present when the raw answer carried citation markers.
    pub groundedness: Option<f64>,
    /// Present when the record has a golden answer.
    pub token_f1: Option<f64>,
    /// Present when the record has a golden answer.
    pub exact_match: Option<bool>,
    /// Present when a judge is configured and replied usefully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge: Option<JudgeScores>,
    /// Why the judge produced no scores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_error: Option<String>,
}

/// Why a record could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    /// Category of the failure.
    pub kind: ErrorKind,
    /// The error message.
    pub message: String,
}

impl From<&RagError> for RecordError {
    fn from(error: &RagError) -> Self {
        Self { kind: error.kind(), message: error.to_string() }
    }
}

/// The outcome of one eval record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordResult {
    /// Position in the eval set, 0-based.
    pub index: usize,
    /// The record id, when the eval set gives one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The question asked.
    pub query: String,
    /// Whether the record was fully evaluated.
    pub status: RecordStatus,
    /// Chunks retrieved, in rank order.
    pub retrieved: Vec<RetrievedHit>,
    /// The final answer text, absent when generation did not run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// How the answer fared against citation checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_status: Option<AnswerStatus>,
    /// Citations kept in the final answer.
    pub citations: Vec<Citation>,
    /// Scores for this record.
    pub metrics: RecordMetrics,
    /// Present when the record failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordError>,
}

impl RecordResult {
    fn new(index: usize, record: &EvalRecord) -> Self {
        Self {
            index,
            id: record.id.clone(),
            query: record.query.clone(),
            status: RecordStatus::Completed,
            retrieved: Vec::new(),
            answer: None,
            answer_status: None,
            citations: Vec::new(),
            metrics: RecordMetrics::default(),
            error: None,
        }
    }

    fn fail(mut self, error: &RagError) -> Self {
        self.status = RecordStatus::Failed;
        self.error = Some(RecordError::from(error));
        self
    }

    /// Display label: the record id, or its 1-based position.
    pub fn label(&self) -> String {
        self.id.clone().unwrap_or_else(|| format!("#{}", self.index + 1))
    }
}

/// Aggregates over completed records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalSummary {
    /// Records in the eval set.
    pub total: usize,
    /// Records evaluated without error.
    pub completed: usize,
    /// Records that failed.
    pub failed: usize,
    /// The `k` of Recall@k.
    pub top_k: usize,
    /// Mean Recall@k over records with expected ids.
    pub mean_recall_at_k: Option<f64>,
    /// Mean reciprocal rank over records with expected ids.
    pub mean_reciprocal_rank: Option<f64>,
    /// Mean groundedness over answers that carried markers.
    pub mean_groundedness: Option<f64>,
    /// Mean token F1 over records with a golden answer.
    pub mean_token_f1: Option<f64>,
    /// Share of exact matches over records with a golden answer.
    pub exact_match_rate: Option<f64>,
    /// Mean judge grounding score, 1 to 5.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_judge_grounding: Option<f64>,
    /// Mean judge correctness score, 1 to 5.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_judge_correctness: Option<f64>,
}

impl EvalSummary {
    fn from_records(records: &[RecordResult], top_k: usize) -> Self {
        let completed: Vec<&RecordMetrics> = records
            .iter()
            .filter(|r| r.status == RecordStatus::Completed)
            .map(|r| &r.metrics)
            .collect();
        let judged = |score: fn(&JudgeScores) -> u8| {
            metrics::mean(completed.iter().map(|m| m.judge.as_ref().map(|j| f64::from(score(j)))))
        };
        Self {
            total: records.len(),
            completed: completed.len(),
            failed: records.len() - completed.len(),
            top_k,
            mean_recall_at_k: metrics::mean(completed.iter().map(|m| m.recall_at_k)),
            mean_reciprocal_rank: metrics::mean(completed.iter().map(|m| m.reciprocal_rank)),
            mean_groundedness: metrics::mean(completed.iter().map(|m| m.groundedness)),
            mean_token_f1: metrics::mean(completed.iter().map(|m| m.token_f1)),
            exact_match_rate: metrics::mean(
                completed.iter().map(|m| m.exact_match.map(|hit| if hit { 1.0 } else { 0.0 })),
            ),
            mean_judge_grounding: judged(|j| j.grounding),
            mean_judge_correctness: judged(|j| j.correctness),
        }
    }
}

/// The result of [`EvalHarness::run`].
///
/// Holds no request ids, timestamps or durations, so two runs over the same
/// index and eval set serialise identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    /// Aggregates over completed records.
    pub summary: EvalSummary,
    /// One entry per record, in eval-set order.
    pub records: Vec<RecordResult>,
}

/// Runs eval records through a [`RagService`] and scores them.
///
/// # Example
///
/// ```rust,ignore
/// let records = cite_eval::load_eval_set("data/eval.jsonl").await?;
/// let report = EvalHarness::new(service).run(&records).await;
/// cite_eval::write_report(&report, "reports").await?;
/// ```
pub struct EvalHarness {
    service: Arc<RagService>,
    config: EvalConfig,
    judge: Option<Arc<dyn Judge>>,
    emitter: TraceEmitter,
    cancel: CancellationToken,
}

impl std::fmt::Debug for EvalHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalHarness")
            .field("config", &self.config)
            .field("judge", &self.judge.is_some())
            .finish_non_exhaustive()
    }
}

impl EvalHarness {
    /// Create a harness over `service` with default settings and no judge.
    pub fn new(service: Arc<RagService>) -> Self {
        Self {
            service,
            config: EvalConfig::default(),
            judge: None,
            emitter: TraceEmitter::disabled(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the run settings.
    pub fn with_config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }

    /// Score answers with `judge` as well.
    pub fn with_judge(mut self, judge: Arc<dyn Judge>) -> Self {
        self.judge = Some(judge);
        self
    }

    /// Emit one evaluation start/end event pair per record.
    pub fn with_emitter(mut self, emitter: TraceEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    /// Abort in-flight generations when `cancel` fires. Affected records fail
    /// with a generation timeout.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Evaluate `records`.
    ///
    /// Up to `concurrency` records run at once. A record that fails is
    /// reported with its error kind and does not affect the others.
    #[instrument(name = "eval.run", skip_all, fields(records = records.len()))]
    pub async fn run(&self, records: &[EvalRecord]) -> EvalReport {
        let concurrency = self.config.concurrency.max(1);
        let results: Vec<RecordResult> = stream::iter(records.iter().enumerate())
            .map(|(index, record)| self.evaluate(index, record))
            .buffered(concurrency)
            .collect()
            .await;

        let summary = EvalSummary::from_records(&results, self.config.top_k);
        info!(
            total = summary.total,
            completed = summary.completed,
            failed = summary.failed,
            "evaluation finished"
        );
        EvalReport { summary, records: results }
    }

    async fn evaluate(&self, index: usize, record: &EvalRecord) -> RecordResult {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("eval.record", request.id = %request_id, record = index);
        async {
            self.emitter.emit(
                TraceEvent::start(&request_id, Stage::Evaluation)
                    .with_attribute("record", index)
                    .with_attribute("query", record.query.as_str()),
            );
            let result = self.score(&request_id, index, record).await;
            let mut end = TraceEvent::end(&request_id, Stage::Evaluation)
                .with_attribute("record", index)
                .with_attribute("metrics", json!(result.metrics));
            match &result.error {
                Some(error) => {
                    warn!(record = index, error = %error.message, "record failed");
                    end = end.with_attribute("error", error.kind.as_str());
                }
                None => end = end.with_attribute("status", "completed"),
            }
            self.emitter.emit(end);
            result
        }
        .instrument(span)
        .await
    }

    async fn score(&self, request_id: &str, index: usize, record: &EvalRecord) -> RecordResult {
        let mut result = RecordResult::new(index, record);
        let mode = self.config.match_mode;

        let retrieved = match self
            .service
            .retriever()
            .retrieve_with_id(request_id, &record.query, self.config.top_k, None)
            .await
        {
            Ok(retrieved) => retrieved,
            Err(e) => return result.fail(&e),
        };
        result.retrieved = retrieved.iter().map(RetrievedHit::from).collect();

        let answer = match self
            .service
            .generator()
            .answer_with(request_id, &record.query, &retrieved, &self.cancel)
            .await
        {
            Ok(answer) => answer,
            Err(e) => return result.fail(&e),
        };

        let expected = &record.expected_chunk_ids;
        result.metrics.recall_at_k =
            metrics::recall_at_k(&retrieved, expected, self.config.top_k, mode);
        result.metrics.reciprocal_rank = metrics::reciprocal_rank(&retrieved, expected, mode);
        result.metrics.groundedness = answer.groundedness();
        if let Some(golden) = &record.golden_answer {
            result.metrics.token_f1 = Some(metrics::token_f1(&answer.text, golden));
            result.metrics.exact_match = Some(metrics::exact_match(&answer.text, golden));
        }
        if let Some(judge) = &self.judge {
            self.apply_judge(judge.as_ref(), record, &retrieved, &answer, &mut result.metrics)
                .await;
        }

        result.answer_status = Some(answer.status);
        result.citations = answer.citations;
        result.answer = Some(answer.text);
        result
    }

    async fn apply_judge(
        &self,
        judge: &dyn Judge,
        record: &EvalRecord,
        retrieved: &[RetrievedChunk],
        answer: &GroundedAnswer,
        metrics: &mut RecordMetrics,
    ) {
        match judge.judge(&record.query, retrieved, &answer.text).await {
            Ok(scores) => metrics.judge = Some(scores),
            Err(e) => {
                warn!(error = %e, "judge failed");
                metrics.judge_error = Some(e.to_string());
            }
        }
    }
}
