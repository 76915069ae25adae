//! Report rendering and persistence.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::harness::{EvalReport, RecordStatus};

/// File name of the JSON report.
pub const JSON_REPORT_FILE: &str = "eval_report.json";
/// File name of the markdown report.
pub const MARKDOWN_REPORT_FILE: &str = "eval_report.md";

fn metric(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"))
}

/// Render `report` as markdown: summary, per-record table, failures.
pub fn render_markdown(report: &EvalReport) -> String {
    let summary = &report.summary;
    let mut out = String::from("# Evaluation Report\n\n## Summary\n\n");
    let rows = [
        ("records".to_string(), summary.total.to_string()),
        ("completed".to_string(), summary.completed.to_string()),
        ("failed".to_string(), summary.failed.to_string()),
        (format!("recall@{}", summary.top_k), metric(summary.mean_recall_at_k)),
        ("mrr".to_string(), metric(summary.mean_reciprocal_rank)),
        ("groundedness".to_string(), metric(summary.mean_groundedness)),
        ("token_f1".to_string(), metric(summary.mean_token_f1)),
        ("exact_match".to_string(), metric(summary.exact_match_rate)),
    ];
    for (name, value) in rows {
        let _ = writeln!(out, "- **{name}**: {value}");
    }
    if summary.mean_judge_grounding.is_some() || summary.mean_judge_correctness.is_some() {
        let _ = writeln!(out, "- **judge_grounding**: {}", metric(summary.mean_judge_grounding));
        let _ = writeln!(
            out,
            "- **judge_correctness**: {}",
            metric(summary.mean_judge_correctness)
        );
    }

    out.push_str("\n## Records\n\n");
    out.push_str("| record | status | recall | mrr | groundedness | f1 |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for record in &report.records {
        let status = match (record.status, record.answer_status) {
            (RecordStatus::Completed, Some(answer)) => answer.as_str(),
            (RecordStatus::Completed, None) => "completed",
            (RecordStatus::Failed, _) => "failed",
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            escape(&record.label()),
            status,
            metric(record.metrics.recall_at_k),
            metric(record.metrics.reciprocal_rank),
            metric(record.metrics.groundedness),
            metric(record.metrics.token_f1),
        );
    }

    let failures: Vec<_> =
        report.records.iter().filter_map(|r| Some((r, r.error.as_ref()?))).collect();
    if !failures.is_empty() {
        out.push_str("\n## Failures\n\n");
        for (record, error) in failures {
            let _ = writeln!(
                out,
                "- {} ({}): {}",
                escape(&record.label()),
                error.kind,
                error.message
            );
        }
    }
    out
}

fn escape(cell: &str) -> String {
    cell.replace('|', "\\|").replace('\n', " ")
}

/// Write `eval_report.json` and `eval_report.md` into `dir`, creating it.
///
/// Returns the paths written, JSON first.
///
/// # Errors
///
/// Returns [`EvalError::Io`](crate::EvalError::Io) when the directory or
/// files cannot be written.
pub async fn write_report(report: &EvalReport, dir: impl AsRef<Path>) -> Result<[PathBuf; 2]> {
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir).await?;
    let json_path = dir.join(JSON_REPORT_FILE);
    let markdown_path = dir.join(MARKDOWN_REPORT_FILE);
    tokio::fs::write(&json_path, serde_json::to_vec_pretty(report)?).await?;
    tokio::fs::write(&markdown_path, render_markdown(report)).await?;
    info!(dir = %dir.display(), records = report.records.len(), "wrote evaluation report");
    Ok([json_path, markdown_path])
}
