use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attribute map carried on a span. Ordered so exports and snapshots are stable.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A single span attribute value: a scalar or a homogeneous array of scalars.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    BoolArray(Vec<bool>),
    I64Array(Vec<i64>),
    F64Array(Vec<f64>),
    StringArray(Vec<String>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(text) => Some(text),
            _ => None,
        }
    }

    /// JSON view of the value, used by masking callbacks and debug snapshots.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Converts a JSON value into the closest attribute representation.
    ///
    /// Objects, nulls and mixed arrays have no attribute form and are
    /// stored as their JSON text.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Bool(flag) => AttributeValue::Bool(flag),
            Value::Number(number) => match number.as_i64() {
                Some(int) => AttributeValue::I64(int),
                None => AttributeValue::F64(number.as_f64().unwrap_or_default()),
            },
            Value::String(text) => AttributeValue::String(text),
            Value::Array(items) => {
                if let Some(strings) = collect_all(&items, |v| v.as_str().map(str::to_string)) {
                    AttributeValue::StringArray(strings)
                } else if let Some(bools) = collect_all(&items, Value::as_bool) {
                    AttributeValue::BoolArray(bools)
                } else if let Some(ints) = collect_all(&items, Value::as_i64) {
                    AttributeValue::I64Array(ints)
                } else if let Some(floats) = collect_all(&items, Value::as_f64) {
                    AttributeValue::F64Array(floats)
                } else {
                    AttributeValue::String(Value::Array(items).to_string())
                }
            }
            other => AttributeValue::String(other.to_string()),
        }
    }
}

fn collect_all<T>(items: &[Value], extract: impl Fn(&Value) -> Option<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        return None;
    }
    items.iter().map(extract).collect()
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::I64(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::F64(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(value: Vec<String>) -> Self {
        AttributeValue::StringArray(value)
    }
}
