use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{AttributeValue, Attributes};

/// Identifies a span within a trace. Ids are lowercase hex: 32 chars for the
/// trace, 16 for the span.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
}

impl SpanContext {
    pub fn new_root() -> Self {
        Self {
            trace_id: format_trace_id(rand::random()),
            span_id: new_span_id(),
        }
    }

    pub fn new_child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
        }
    }
}

fn new_span_id() -> String {
    format_span_id(rand::random())
}

// All-zero ids are invalid on the wire.
fn format_trace_id(raw: u128) -> String {
    format!("{:032x}", raw.max(1))
}

fn format_span_id(raw: u64) -> String {
    format!("{:016x}", raw.max(1))
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "lowercase")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error { message: Option<String> },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Resource {
    pub attributes: Attributes,
}

impl Resource {
    pub fn new(attributes: impl IntoIterator<Item = (String, AttributeValue)>) -> Self {
        Self {
            attributes: attributes.into_iter().collect(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InstrumentationScope {
    pub name: String,
    pub version: Option<String>,
}

impl InstrumentationScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }
}

/// A span as seen by processors and exporters.
///
/// Processors may only mutate `attributes` while the span is inside their
/// `on_start`/`on_end` hooks; once handed to an exporter it is read-only.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpanData {
    pub name: String,
    pub span_context: SpanContext,
    pub parent_span_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub attributes: Attributes,
    pub status: SpanStatus,
    pub resource: Resource,
    pub scope: InstrumentationScope,
}

impl SpanData {
    pub fn new(name: impl Into<String>, span_context: SpanContext) -> Self {
        Self {
            name: name.into(),
            span_context,
            parent_span_id: None,
            start_time: Utc::now(),
            end_time: None,
            attributes: Attributes::new(),
            status: SpanStatus::Unset,
            resource: Resource::default(),
            scope: InstrumentationScope::default(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.span_context.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_context.span_id
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(AttributeValue::as_str)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.end_time
            .and_then(|end| (end - self.start_time).to_std().ok())
    }

    /// Diagnostic view of the span used for debug logging.
    pub fn snapshot(&self) -> Value {
        json!({
            "name": self.name,
            "trace_id": self.span_context.trace_id,
            "span_id": self.span_context.span_id,
            "parent_span_id": self.parent_span_id,
            "start_time": self.start_time.to_rfc3339(),
            "end_time": self.end_time.map(|end| end.to_rfc3339()),
            "duration_ms": self.duration().map(|d| d.as_millis() as u64),
            "attributes": self.attributes,
            "status": self.status,
            "resource": self.resource.attributes,
            "instrumentation_scope": self.scope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_context_keeps_trace_id() {
        let root = SpanContext::new_root();
        let child = root.new_child();
        assert_eq!(root.trace_id, child.trace_id);
        assert_ne!(root.span_id, child.span_id);
        assert_eq!(root.trace_id.len(), 32);
        assert_eq!(child.span_id.len(), 16);
    }

    #[test]
    fn zero_ids_are_never_produced() {
        assert_eq!(format_trace_id(0), format!("{:032x}", 1));
        assert_eq!(format_span_id(0), "0000000000000001");
        assert_eq!(format_span_id(0xab), "00000000000000ab");
    }

    #[test]
    fn duration_is_none_until_ended() {
        let mut span = SpanData::new("work", SpanContext::new_root());
        assert!(span.duration().is_none());
        span.end_time = Some(span.start_time + chrono::Duration::milliseconds(5));
        assert_eq!(span.duration(), Some(Duration::from_millis(5)));
    }
}
