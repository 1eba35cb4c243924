//! OTLP/HTTP JSON encoding of span batches.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracelane_core::{AttributeValue, Attributes, InstrumentationScope, SpanData, SpanStatus};

const STATUS_UNSET: u8 = 0;
const STATUS_OK: u8 = 1;
const STATUS_ERROR: u8 = 2;
const SPAN_KIND_INTERNAL: u8 = 1;

/// Groups spans by resource, then by instrumentation scope.
pub fn encode_spans(spans: &[SpanData]) -> Value {
    let mut by_resource: Vec<(&Attributes, BTreeMap<ScopeKey<'_>, Vec<Value>>)> = Vec::new();

    for span in spans {
        let resource = &span.resource.attributes;
        let index = match by_resource.iter().position(|(attrs, _)| *attrs == resource) {
            Some(index) => index,
            None => {
                by_resource.push((resource, BTreeMap::new()));
                by_resource.len() - 1
            }
        };
        by_resource[index]
            .1
            .entry(ScopeKey::from(&span.scope))
            .or_default()
            .push(encode_span(span));
    }

    let resource_spans: Vec<Value> = by_resource
        .into_iter()
        .map(|(resource, scopes)| {
            let scope_spans: Vec<Value> = scopes
                .into_iter()
                .map(|(scope, spans)| {
                    json!({
                        "scope": {"name": scope.name, "version": scope.version.unwrap_or_default()},
                        "spans": spans,
                    })
                })
                .collect();
            json!({
                "resource": {"attributes": encode_attributes(resource)},
                "scopeSpans": scope_spans,
            })
        })
        .collect();

    json!({ "resourceSpans": resource_spans })
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ScopeKey<'a> {
    name: &'a str,
    version: Option<&'a str>,
}

impl<'a> From<&'a InstrumentationScope> for ScopeKey<'a> {
    fn from(scope: &'a InstrumentationScope) -> Self {
        Self {
            name: &scope.name,
            version: scope.version.as_deref(),
        }
    }
}

fn encode_span(span: &SpanData) -> Value {
    let start = unix_nanos(span.start_time);
    let end = span.end_time.map(unix_nanos).unwrap_or(start);
    let (code, message) = match &span.status {
        SpanStatus::Unset => (STATUS_UNSET, None),
        SpanStatus::Ok => (STATUS_OK, None),
        SpanStatus::Error { message } => (STATUS_ERROR, message.clone()),
    };

    let mut encoded = json!({
        "traceId": span.span_context.trace_id,
        "spanId": span.span_context.span_id,
        "name": span.name,
        "kind": SPAN_KIND_INTERNAL,
        "startTimeUnixNano": start.to_string(),
        "endTimeUnixNano": end.to_string(),
        "attributes": encode_attributes(&span.attributes),
        "status": {"code": code, "message": message.unwrap_or_default()},
    });
    if let Some(parent) = &span.parent_span_id {
        encoded["parentSpanId"] = Value::String(parent.clone());
    }
    encoded
}

fn encode_attributes(attributes: &Attributes) -> Vec<Value> {
    attributes
        .iter()
        .map(|(key, value)| json!({"key": key, "value": any_value(value)}))
        .collect()
}

fn any_value(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Bool(flag) => json!({"boolValue": flag}),
        // int64 travels as a string in OTLP JSON.
        AttributeValue::I64(int) => json!({"intValue": int.to_string()}),
        AttributeValue::F64(float) => json!({"doubleValue": float}),
        AttributeValue::String(text) => json!({"stringValue": text}),
        AttributeValue::BoolArray(items) => {
            array_value(items.iter().map(|v| json!({"boolValue": v})))
        }
        AttributeValue::I64Array(items) => {
            array_value(items.iter().map(|v| json!({"intValue": v.to_string()})))
        }
        AttributeValue::F64Array(items) => {
            array_value(items.iter().map(|v| json!({"doubleValue": v})))
        }
        AttributeValue::StringArray(items) => {
            array_value(items.iter().map(|v| json!({"stringValue": v})))
        }
    }
}

fn array_value(values: impl Iterator<Item = Value>) -> Value {
    json!({"arrayValue": {"values": values.collect::<Vec<_>>()}})
}

fn unix_nanos(time: chrono::DateTime<chrono::Utc>) -> i64 {
    time.timestamp_nanos_opt().unwrap_or_default()
}
