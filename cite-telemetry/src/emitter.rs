//! Fire-and-forget trace emission with bounded local buffering.
//!
//! The [`TraceEmitter`] hands events to a bounded channel with `try_send`, so
//! emitting never waits on the sink. A background task drains the channel
//! into a [`TraceSink`]. When the buffer is full the event is dropped and
//! counted; when no sink is configured emission is a no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::event::TraceEvent;

/// Default capacity of the local event buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// A destination for trace events (an observability backend, a file, ...).
///
/// Sinks own their failure handling: `record` has no error channel because
/// the pipeline must never be affected by the sink.
#[async_trait]
pub trait TraceSink: Send + Sync {
    /// Record one event.
    async fn record(&self, event: TraceEvent);
}

struct EmitterInner {
    tx: mpsc::Sender<TraceEvent>,
    dropped: AtomicU64,
}

/// Cheap-to-clone handle used by pipeline stages to emit trace events.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use cite_telemetry::{LogSink, TraceEmitter, TraceEvent, Stage};
///
/// let (emitter, drain) = TraceEmitter::spawn(Arc::new(LogSink), 256);
/// emitter.emit(TraceEvent::start("req-1", Stage::Retrieval));
/// drop(emitter);
/// drain.await?;
/// ```
#[derive(Clone, Default)]
pub struct TraceEmitter {
    inner: Option<Arc<EmitterInner>>,
}

impl std::fmt::Debug for TraceEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceEmitter")
            .field("enabled", &self.is_enabled())
            .field("dropped", &self.dropped_events())
            .finish()
    }
}

impl TraceEmitter {
    /// An emitter with no sink. Every `emit` is discarded.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Start a drain task forwarding events to `sink`.
    ///
    /// Must be called from within a Tokio runtime. The returned handle
    /// completes once every clone of the emitter has been dropped and the
    /// buffer has been drained.
    pub fn spawn(sink: Arc<dyn TraceSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<TraceEvent>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sink.record(event).await;
            }
            debug!("trace drain finished");
        });
        let inner = EmitterInner { tx, dropped: AtomicU64::new(0) };
        (Self { inner: Some(Arc::new(inner)) }, handle)
    }

    /// Whether a sink is attached.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Queue an event without waiting. Drops the event if the buffer is full.
    pub fn emit(&self, event: TraceEvent) {
        let Some(inner) = &self.inner else {
            return;
        };
        match inner.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                let dropped = inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    request.id = %event.request_id,
                    stage = event.stage.as_str(),
                    dropped,
                    "trace buffer full, dropping event"
                );
            }
            Err(TrySendError::Closed(event)) => {
                inner.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(request.id = %event.request_id, "trace sink closed, dropping event");
            }
        }
    }

    /// Number of events dropped because the buffer was full or closed.
    pub fn dropped_events(&self) -> u64 {
        self.inner.as_ref().map_or(0, |inner| inner.dropped.load(Ordering::Relaxed))
    }
}
