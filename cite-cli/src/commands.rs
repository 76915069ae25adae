//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use cite_eval::{EvalConfig, EvalHarness, LlmJudge, MatchMode};
use cite_rag::{
    AskOptions, Embedder, IngestFailure, Ingestor, RagConfig, RagService, TextChunker,
};
use cite_telemetry::{JsonlSink, LogSink, TraceEmitter, TraceSink};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{Cli, Commands, ProviderArgs};

fn load_config(path: Option<&Path>) -> Result<RagConfig> {
    match path {
        Some(path) => RagConfig::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(RagConfig::default()),
    }
}

fn report_failures(failures: &[IngestFailure]) {
    for failure in failures {
        warn!(
            path = %failure.path.display(),
            kind = %failure.kind,
            message = %failure.message,
            "skipped document"
        );
    }
}

/// Run the selected subcommand, then flush trace events.
pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let sink: Option<Arc<dyn TraceSink>> = match &cli.trace_file {
        Some(path) => Some(Arc::new(JsonlSink::new(path))),
        None if cli.trace_log => Some(Arc::new(LogSink)),
        None => None,
    };
    let (emitter, drain) = match sink {
        Some(sink) => {
            let (emitter, drain) =
                TraceEmitter::spawn(sink, cite_telemetry::DEFAULT_BUFFER_CAPACITY);
            (emitter, Some(drain))
        }
        None => (TraceEmitter::disabled(), None),
    };

    let result = dispatch(cli.command, &cli.providers, config, emitter).await;
    flush(drain).await;
    result
}

async fn flush(drain: Option<JoinHandle<()>>) {
    if let Some(drain) = drain {
        if let Err(e) = drain.await {
            warn!(error = %e, "trace writer stopped unexpectedly");
        }
    }
}

async fn dispatch(
    command: Commands,
    providers: &ProviderArgs,
    config: RagConfig,
    emitter: TraceEmitter,
) -> Result<()> {
    match command {
        Commands::Ingest { input, out } => {
            let chunker = Arc::new(TextChunker::new(config.chunking.clone())?);
            let report = Ingestor::new(chunker).with_emitter(emitter).ingest_dir(&input, &out)?;
            report_failures(&report.failures);
            println!(
                "Processed {} documents ({} chunks) into {}; {} skipped.",
                report.documents.len(),
                report.chunk_count(),
                out.display(),
                report.failures.len()
            );
        }
        Commands::BuildIndex { processed, index } => {
            let backends = providers.backends()?;
            let chunker = Arc::new(TextChunker::new(config.chunking.clone())?);
            let embedder = Embedder::new(backends.embedding, config.embedding.clone());
            let report = Ingestor::new(chunker)
                .with_emitter(emitter)
                .build_index(&processed, &index, &embedder)
                .await?;
            report_failures(&report.failures);
            println!(
                "Indexed {} documents ({} entries, dimension {}, model {}) into {}; {} skipped.",
                report.documents.len(),
                report.manifest.entry_count,
                report.manifest.dimension,
                report.manifest.embedding_model,
                index.display(),
                report.failures.len()
            );
        }
        Commands::Ask { index, top_k, json, query } => {
            let service = open_service(providers, config, emitter, &index).await?;
            let options = AskOptions { top_k, filter: None };
            let response = service.ask_with(&query, &options, &CancellationToken::new()).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", response.answer.text);
                if !response.answer.citations.is_empty() {
                    println!("\nSources:");
                    for citation in &response.answer.citations {
                        let source = response
                            .retrieved
                            .iter()
                            .find(|r| r.chunk.id == citation.chunk_id)
                            .and_then(|r| r.chunk.source())
                            .unwrap_or_default();
                        println!("  [{}] {} {}", citation.marker, citation.chunk_id, source);
                    }
                }
            }
            if let Some(kind) = response.error {
                anyhow::bail!("request {} failed: {kind}", response.request_id);
            }
        }
        Commands::Eval { index, data, report, top_k, concurrency, match_documents, judge } => {
            let records = cite_eval::load_eval_set(&data).await?;
            let service = open_service(providers, config, emitter.clone(), &index).await?;
            let eval_config = EvalConfig {
                top_k,
                concurrency,
                match_mode: if match_documents {
                    MatchMode::ChunkOrDocument
                } else {
                    MatchMode::Exact
                },
            };
            let mut harness =
                EvalHarness::new(Arc::new(service)).with_config(eval_config).with_emitter(emitter);
            if judge {
                harness = harness.with_judge(Arc::new(LlmJudge::new(providers.judge()?)));
            }

            let outcome = harness.run(&records).await;
            let [json_path, markdown_path] = cite_eval::write_report(&outcome, &report).await?;
            let summary = &outcome.summary;
            info!(
                completed = summary.completed,
                failed = summary.failed,
                recall = ?summary.mean_recall_at_k,
                mrr = ?summary.mean_reciprocal_rank,
                "evaluation complete"
            );
            println!(
                "Evaluated {} records ({} failed). Reports: {}, {}",
                summary.total,
                summary.failed,
                json_path.display(),
                markdown_path.display()
            );
        }
    }
    Ok(())
}

async fn open_service(
    providers: &ProviderArgs,
    config: RagConfig,
    emitter: TraceEmitter,
    index: &Path,
) -> Result<RagService> {
    let backends = providers.backends()?;
    let service = RagService::builder()
        .config(config)
        .embedding_provider(backends.embedding)
        .generation_provider(backends.generation)
        .emitter(emitter)
        .build()?;
    let version = service
        .load_index(index)
        .await
        .with_context(|| format!("failed to load index from {}", index.display()))?;
    info!(index = %index.display(), version, "index loaded");
    Ok(service)
}
