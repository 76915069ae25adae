use std::sync::Arc;

use tracing::info_span;
use tracing_subscriber::Registry;
use tracing_subscriber::layer::SubscriberExt;

use crate::memory::{InMemoryTraceLayer, SharedTraceStorage};

fn capture() -> (Arc<SharedTraceStorage>, tracing::subscriber::DefaultGuard) {
    let storage = Arc::new(SharedTraceStorage::new());
    let subscriber = Registry::default().with(InMemoryTraceLayer::new(storage.clone()));
    (storage, tracing::subscriber::set_default(subscriber))
}

#[test]
fn captures_span_under_request_id() {
    let (storage, _guard) = capture();

    let span = info_span!("rag.retrieve", request.id = "req-123", top_k = 3u64);
    {
        let _entered = span.enter();
        tracing::info!("searching");
    }
    drop(span);

    let spans = storage.get_trace("req-123").expect("span stored under request id");
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert_eq!(span.name, "rag.retrieve");
    assert_eq!(span.attributes["top_k"], 3);
    assert!(span.start_time > 0);
    assert!(span.end_time.is_some());
    assert_eq!(span.status.code, 1);
}

#[test]
fn child_spans_inherit_request_id() {
    let (storage, _guard) = capture();

    let parent = info_span!("rag.ask", request.id = "req-456");
    {
        let _entered = parent.enter();
        let child = info_span!("rag.generate", passages = 2u64);
        drop(child);
    }
    drop(parent);

    let spans = storage.get_trace("req-456").unwrap();
    let names: Vec<&str> = spans.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["rag.generate", "rag.ask"]);
    assert!(spans[0].parent_id.is_some());
}

#[test]
fn spans_without_request_id_are_ignored() {
    let (storage, _guard) = capture();

    drop(info_span!("unrelated"));

    assert!(storage.is_empty());
}

#[test]
fn error_field_marks_span_failed() {
    let (storage, _guard) = capture();

    let span = info_span!("rag.generate", request.id = "req-789", error = tracing::field::Empty);
    span.record("error", "generation timed out");
    drop(span);

    let spans = storage.get_trace("req-789").unwrap();
    assert_eq!(spans[0].status.code, 2);
    assert_eq!(spans[0].status.message.as_deref(), Some("generation timed out"));
}
