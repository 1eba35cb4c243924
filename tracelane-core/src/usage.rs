//! Token usage normalization.
//!
//! Providers report usage in different shapes. Each shape is handled
//! explicitly so detail counts are subtracted only where the provider's
//! totals include them.

use std::collections::BTreeMap;

use serde_json::Value;

pub type UsageDetails = BTreeMap<String, i64>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UsageShape {
    /// `prompt_tokens` / `completion_tokens` with `*_tokens_details`.
    OpenAiChat,
    /// `input_tokens` / `output_tokens` with `*_tokens_details`.
    OpenAiResponses,
    /// `input_tokens` / `output_tokens` plus separate cache counters that
    /// are not part of `input_tokens`.
    Anthropic,
    /// Integer fields copied verbatim.
    Generic,
}

pub fn normalize_usage(shape: UsageShape, raw: &Value) -> UsageDetails {
    match shape {
        UsageShape::OpenAiChat => openai_usage(
            raw,
            ("prompt_tokens", "prompt_tokens_details"),
            ("completion_tokens", "completion_tokens_details"),
        ),
        UsageShape::OpenAiResponses => openai_usage(
            raw,
            ("input_tokens", "input_tokens_details"),
            ("output_tokens", "output_tokens_details"),
        ),
        UsageShape::Anthropic => anthropic_usage(raw),
        UsageShape::Generic => generic_usage(raw),
    }
}

fn openai_usage(raw: &Value, input: (&str, &str), output: (&str, &str)) -> UsageDetails {
    let mut usage = UsageDetails::new();
    for (direction, (total_key, details_key)) in [("input", input), ("output", output)] {
        let Some(mut total) = raw.get(total_key).and_then(Value::as_i64) else {
            continue;
        };
        if let Some(details) = raw.get(details_key).and_then(Value::as_object) {
            for (key, count) in details {
                let Some(count) = count.as_i64() else {
                    continue;
                };
                let key = key.strip_suffix("_tokens").unwrap_or(key);
                usage.insert(format!("{direction}_{key}"), count);
                total -= count;
            }
        }
        usage.insert(direction.to_string(), total.max(0));
    }
    if let Some(total) = raw.get("total_tokens").and_then(Value::as_i64) {
        usage.insert("total".to_string(), total);
    }
    usage
}

fn anthropic_usage(raw: &Value) -> UsageDetails {
    let mut usage = UsageDetails::new();
    let mapping = [
        ("input_tokens", "input"),
        ("output_tokens", "output"),
        ("cache_creation_input_tokens", "input_cache_creation"),
        ("cache_read_input_tokens", "input_cache_read"),
    ];
    for (source, target) in mapping {
        if let Some(count) = raw.get(source).and_then(Value::as_i64) {
            usage.insert(target.to_string(), count);
        }
    }
    if !usage.is_empty() {
        usage.insert("total".to_string(), usage.values().sum());
    }
    usage
}

fn generic_usage(raw: &Value) -> UsageDetails {
    raw.as_object()
        .map(|map| {
            map.iter()
                .filter_map(|(key, value)| value.as_i64().map(|count| (key.clone(), count)))
                .collect()
        })
        .unwrap_or_default()
}
