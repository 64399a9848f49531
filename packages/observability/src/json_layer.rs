//! One JSON object per event, written through a `MakeWriter`.
//!
//! Every line carries `ts`, `level`, `service`, `pid`, `target` and `msg`.
//! Event fields land under `fields` in name order, with credential-looking
//! names masked before serialization. `scope` lists the enclosing spans,
//! outermost first.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Replacement written in place of a sensitive field value.
pub const REDACTED: &str = "[REDACTED]";

/// Field names whose values never reach a log line.
const DENYLIST_KEYS: &[&str] = &[
    "authorization",
    "access_token",
    "refresh_token",
    "token",
    "password",
    "secret",
    "cookie",
];

/// Returns true when a field name matches the credential denylist.
pub fn is_sensitive_key(key: &str) -> bool {
    DENYLIST_KEYS
        .iter()
        .any(|denied| key.eq_ignore_ascii_case(denied))
}

/// One serialized log line.
#[derive(Debug, Serialize)]
struct LogLine<'a> {
    ts: String,
    level: &'static str,
    service: &'a str,
    pid: u32,
    target: &'a str,
    msg: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    fields: BTreeMap<&'static str, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    scope: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<u32>,
}

/// Collects an event's message and masked fields.
#[derive(Default)]
struct EventFields {
    msg: String,
    fields: BTreeMap<&'static str, Value>,
}

impl EventFields {
    fn put(&mut self, field: &Field, value: Value) {
        let name = field.name();
        if name == "message" {
            self.msg = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
        } else if is_sensitive_key(name) {
            self.fields.insert(name, Value::from(REDACTED));
        } else {
            self.fields.insert(name, value);
        }
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::from(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        // NaN and infinities have no JSON number form.
        let value = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::from(value.to_string()));
        self.put(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::from(value.to_string()));
    }
}

/// Layer that renders each event as a JSONL line for one service.
pub struct JsonLayer<W> {
    service_name: String,
    pid: u32,
    make_writer: W,
}

impl<W> JsonLayer<W> {
    pub fn new(service_name: String, make_writer: W) -> Self {
        Self {
            service_name,
            pid: std::process::id(),
            make_writer,
        }
    }
}

impl<S, W> Layer<S> for JsonLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut collected = EventFields::default();
        event.record(&mut collected);

        let scope = ctx
            .event_scope(event)
            .map(|spans| spans.from_root().map(|span| span.name()).collect())
            .unwrap_or_default();

        let metadata = event.metadata();
        let line = LogLine {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            level: metadata.level().as_str(),
            service: &self.service_name,
            pid: self.pid,
            target: metadata.target(),
            msg: collected.msg,
            fields: collected.fields,
            scope,
            line: metadata.line(),
        };

        let Ok(mut rendered) = serde_json::to_vec(&line) else {
            return;
        };
        rendered.push(b'\n');
        // One write per line keeps concurrent writers from interleaving.
        let _ = self.make_writer.make_writer().write_all(&rendered);
    }
}
