//! Offline evaluation for the cite RAG pipeline.
//!
//! This crate provides:
//! - A JSONL eval-set loader ([`load_eval_set`])
//! - Retrieval metrics (Recall@k, MRR) and answer metrics (groundedness,
//!   token F1, exact match) ([`metrics`])
//! - An optional model-graded [`Judge`]
//! - A concurrent harness whose reports keep eval-set order ([`EvalHarness`])
//! - JSON and markdown report writing ([`write_report`])

pub mod error;
pub mod harness;
pub mod judge;
pub mod metrics;
pub mod record;
pub mod report;

pub use error::{EvalError, Result};
pub use harness::{
    EvalConfig, EvalHarness, EvalReport, EvalSummary, RecordError, RecordMetrics, RecordResult,
    RecordStatus, RetrievedHit,
};
pub use judge::{Judge, JudgeScores, LlmJudge};
pub use metrics::MatchMode;
pub use record::{EvalRecord, load_eval_set, parse_eval_set};
pub use report::{JSON_REPORT_FILE, MARKDOWN_REPORT_FILE, render_markdown, write_report};
