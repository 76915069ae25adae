//! Telemetry for the cite RAG pipeline.
//!
//! This crate provides:
//! - Logging setup ([`init_telemetry`]) on top of
//!   `tracing-subscriber` with `RUST_LOG` filtering
//! - Structured [`TraceEvent`]s for the ingestion, retrieval, generation and
//!   evaluation stages
//! - A non-blocking [`TraceEmitter`] with bounded buffering, and sinks
//!   ([`LogSink`], [`JsonlSink`], [`MemorySink`])
//! - In-memory span capture keyed by request id ([`memory`])

pub mod emitter;
pub mod event;
pub mod memory;
pub mod sink;

#[cfg(test)]
mod test_inmemory;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub use emitter::{DEFAULT_BUFFER_CAPACITY, TraceEmitter, TraceSink};
pub use event::{Phase, Stage, TokenUsage, TraceEvent};
pub use memory::{InMemoryTraceLayer, SharedTraceStorage, SpanData, SpanStatus};
pub use sink::{JsonlSink, LogSink, MemorySink};

/// Output format of the console log layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + 'static,
{
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(true);
    match format {
        LogFormat::Pretty => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Install the global subscriber: `RUST_LOG` filter (default `info`) plus a
/// console layer writing to stderr.
///
/// # Errors
///
/// Returns [`TelemetryError::Init`] if a global subscriber is already set.
pub fn init_telemetry(service_name: &str, format: LogFormat) -> Result<(), TelemetryError> {
    Registry::default().with(env_filter()).with(fmt_layer(format)).try_init()?;
    tracing::debug!(service.name = service_name, "telemetry initialised");
    Ok(())
}
