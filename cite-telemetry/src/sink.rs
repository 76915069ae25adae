//! Built-in [`TraceSink`] implementations.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::emitter::TraceSink;
use crate::event::TraceEvent;

/// Writes every event as a structured `tracing` log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl TraceSink for LogSink {
    async fn record(&self, event: TraceEvent) {
        let attributes = serde_json::to_string(&event.attributes).unwrap_or_default();
        tracing::event!(
            target: "cite::trace",
            tracing::Level::INFO,
            request.id = %event.request_id,
            stage = event.stage.as_str(),
            phase = ?event.phase,
            prompt_tokens = event.usage.map(|u| u.prompt_tokens),
            completion_tokens = event.usage.map(|u| u.completion_tokens),
            %attributes,
            "trace event"
        );
    }
}

/// Appends events as JSON lines to a file.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    /// Create a sink appending to `path`. The file is created on first write.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    async fn append(&self, event: &TraceEvent) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file =
            tokio::fs::OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}

#[async_trait]
impl TraceSink for JsonlSink {
    async fn record(&self, event: TraceEvent) {
        if let Err(e) = self.append(&event).await {
            warn!(path = %self.path.display(), error = %e, "failed to write trace event");
        }
    }
}

/// Keeps events in memory. Useful in tests and for short diagnostic runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events, in arrival order.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TraceSink for MemorySink {
    async fn record(&self, event: TraceEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Stage;

    #[tokio::test]
    async fn jsonl_sink_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let sink = JsonlSink::new(&path);

        sink.record(TraceEvent::start("req-1", Stage::Ingestion)).await;
        sink.record(TraceEvent::end("req-1", Stage::Ingestion).with_attribute("chunks", 4)).await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let last: TraceEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(last.attributes["chunks"], 4);
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn log_sink_writes_a_structured_line() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        LogSink
            .record(TraceEvent::end("req-9", Stage::Retrieval).with_attribute("results", 3))
            .await;

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("trace event"));
        assert!(output.contains("req-9"));
        assert!(output.contains("retrieval"));
    }

    #[tokio::test]
    async fn jsonl_sink_survives_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(dir.path().join("missing").join("trace.jsonl"));
        // Logged and swallowed.
        sink.record(TraceEvent::start("req-1", Stage::Ingestion)).await;
    }
}
