//! `cite`: ingest documents, build an index, ask grounded questions and run
//! offline evaluations from the command line.

mod commands;
mod providers;

use std::path::PathBuf;

use anyhow::Result;
use cite_telemetry::LogFormat;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Grounded document question answering with enforced citations.
#[derive(Parser, Debug)]
#[command(name = "cite", version, about, long_about = None)]
struct Cli {
    /// JSON configuration file (chunking, embedding, retrieval, generation).
    #[arg(short, long, global = true, env = "CITE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Append stage trace events to this JSONL file.
    #[arg(long, global = true, env = "CITE_TRACE_FILE")]
    trace_file: Option<PathBuf>,

    /// Log stage trace events instead of writing them to a file.
    #[arg(long, global = true, env = "CITE_TRACE_LOG", conflicts_with = "trace_file")]
    trace_log: bool,

    #[command(flatten)]
    providers: ProviderArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and chunk documents into processed JSON files.
    Ingest {
        /// Directory of .txt, .md, .html and .pdf files.
        #[arg(long)]
        input: PathBuf,
        /// Output directory for processed documents and the manifest.
        #[arg(long)]
        out: PathBuf,
    },
    /// Embed processed documents and persist a vector index.
    BuildIndex {
        /// Directory written by `cite ingest`.
        #[arg(long)]
        processed: PathBuf,
        /// Output directory for the index.
        #[arg(long)]
        index: PathBuf,
    },
    /// Answer a question from a persisted index.
    Ask {
        /// Index directory written by `cite build-index`.
        #[arg(long)]
        index: PathBuf,
        /// Number of chunks to retrieve.
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
        /// The question.
        query: String,
    },
    /// Evaluate retrieval and answers against a JSONL eval set.
    Eval {
        /// Index directory written by `cite build-index`.
        #[arg(long)]
        index: PathBuf,
        /// JSONL eval set.
        #[arg(long)]
        data: PathBuf,
        /// Directory for eval_report.json and eval_report.md.
        #[arg(long, default_value = "reports")]
        report: PathBuf,
        /// Chunks retrieved per record (the k of Recall@k).
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
        /// Records evaluated at the same time.
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
        /// Let expected ids name whole documents as well as chunks.
        #[arg(long)]
        match_documents: bool,
        /// Grade answers with a model judge.
        #[arg(long)]
        judge: bool,
    },
}

/// Which embedding and generation backends to use.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Provider {
    /// Feature-hashing embeddings and extractive answers; no network.
    Offline,
    /// OpenAI embeddings and chat completions (`OPENAI_API_KEY`).
    Openai,
}

#[derive(Args, Debug)]
struct ProviderArgs {
    /// Backend for embeddings and generation.
    #[arg(long, global = true, value_enum, default_value_t = Provider::Offline, env = "CITE_PROVIDER")]
    provider: Provider,

    /// Embedding dimension of the offline hashing embedder.
    #[arg(long, global = true, default_value_t = cite_rag::hashing::DEFAULT_HASHING_DIMENSION)]
    dimension: usize,

    /// Embedding model for the OpenAI backend.
    #[cfg_attr(not(feature = "openai"), allow(dead_code))]
    #[arg(long, global = true, env = "CITE_EMBEDDING_MODEL")]
    embedding_model: Option<String>,

    /// Chat model for the OpenAI backend.
    #[cfg_attr(not(feature = "openai"), allow(dead_code))]
    #[arg(long, global = true, env = "CITE_CHAT_MODEL")]
    chat_model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let format = if cli.json_logs { LogFormat::Json } else { LogFormat::Pretty };
    cite_telemetry::init_telemetry("cite", format)?;

    commands::run(cli).await
}
