//! In-memory capture of `tracing` spans keyed by request id.
//!
//! [`InMemoryTraceLayer`] records every closed span that carries a
//! `request.id` (or `request_id`) field, directly or through a parent span,
//! into a [`SharedTraceStorage`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use serde::Serialize;
use tracing::{Id, Subscriber};
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};

/// Field names under which a request id is recognised.
const REQUEST_KEYS: [&str; 2] = ["request.id", "request_id"];

/// Data for a captured span.
#[derive(Debug, Clone, Serialize)]
pub struct SpanData {
    #[serde(rename = "span_id")]
    pub id: String,
    pub request_id: String,
    pub name: String,
    #[serde(rename = "parent_span_id", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Nanoseconds since the Unix epoch.
    pub start_time: u128,
    pub end_time: Option<u128>,
    pub attributes: HashMap<String, serde_json::Value>,
    pub status: SpanStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpanStatus {
    // 0=Unset, 1=Ok, 2=Error
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Shared storage for captured spans.
#[derive(Debug, Clone, Default)]
pub struct SharedTraceStorage {
    /// Map of request id -> spans closed under it, in close order.
    traces: Arc<RwLock<HashMap<String, Vec<SpanData>>>>,
}

impl SharedTraceStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_trace(&self, request_id: &str) -> Option<Vec<SpanData>> {
        self.traces.read().ok()?.get(request_id).cloned()
    }

    pub fn add_span(&self, request_id: String, span: SpanData) {
        if let Ok(mut traces) = self.traces.write() {
            traces.entry(request_id).or_default().push(span);
        }
    }

    /// Number of distinct request ids with at least one span.
    pub fn len(&self) -> usize {
        self.traces.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A tracing layer that captures spans in memory.
pub struct InMemoryTraceLayer {
    storage: Arc<SharedTraceStorage>,
}

impl InMemoryTraceLayer {
    pub fn new(storage: Arc<SharedTraceStorage>) -> Self {
        Self { storage }
    }
}

#[derive(Clone)]
struct SpanFields(HashMap<String, serde_json::Value>);

/// Start time of a span in nanoseconds.
#[derive(Clone, Copy)]
struct StartTime(u128);

fn now_nanos() -> u128 {
    SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_nanos()
}

impl<S> Layer<S> for InMemoryTraceLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        let mut fields = visitor.0;

        // Inherit the request id from the closest ancestor that has one.
        if let Some(parent) = span.parent() {
            if let Some(parent_fields) = parent.extensions().get::<SpanFields>() {
                for key in REQUEST_KEYS {
                    if !fields.contains_key(key) {
                        if let Some(val) = parent_fields.0.get(key) {
                            fields.insert(key.to_string(), val.clone());
                        }
                    }
                }
            }
        }

        let mut extensions = span.extensions_mut();
        extensions.insert(StartTime(now_nanos()));
        extensions.insert(SpanFields(fields));
    }

    fn on_record(&self, id: &Id, values: &tracing::span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanFields>() {
            let mut visitor = JsonVisitor::default();
            values.record(&mut visitor);
            fields.0.extend(visitor.0);
        }
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else {
            return;
        };
        let extensions = span.extensions();
        let fields = extensions.get::<SpanFields>().map(|f| f.0.clone()).unwrap_or_default();

        let request_id = REQUEST_KEYS
            .iter()
            .find_map(|key| fields.get(*key).and_then(|v| v.as_str()).map(str::to_string));
        let Some(request_id) = request_id else {
            return;
        };

        let status = match fields.get("error").and_then(|v| v.as_str()) {
            Some(message) => SpanStatus { code: 2, message: Some(message.to_string()) },
            None => SpanStatus { code: 1, message: None },
        };

        let span_data = SpanData {
            id: format!("{:016x}", id.into_u64()),
            request_id: request_id.clone(),
            name: span.metadata().name().to_string(),
            parent_id: span.parent().map(|p| format!("{:016x}", p.id().into_u64())),
            start_time: extensions.get::<StartTime>().map_or(0, |s| s.0),
            end_time: Some(now_nanos()),
            attributes: fields,
            status,
        };

        self.storage.add_span(request_id, span_data);
    }
}

#[derive(Default)]
struct JsonVisitor(HashMap<String, serde_json::Value>);

impl tracing::field::Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), serde_json::Value::Bool(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }
}
