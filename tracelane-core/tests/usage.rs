use serde_json::json;
use tracelane_core::{normalize_usage, UsageShape};

#[test]
fn openai_chat_details_are_subtracted_from_totals() {
    let usage = normalize_usage(
        UsageShape::OpenAiChat,
        &json!({
            "prompt_tokens": 100,
            "completion_tokens": 50,
            "total_tokens": 150,
            "prompt_tokens_details": {"cached_tokens": 30},
            "completion_tokens_details": {"reasoning_tokens": 20}
        }),
    );

    assert_eq!(usage.get("input"), Some(&70));
    assert_eq!(usage.get("input_cached"), Some(&30));
    assert_eq!(usage.get("output"), Some(&30));
    assert_eq!(usage.get("output_reasoning"), Some(&20));
    assert_eq!(usage.get("total"), Some(&150));
}

#[test]
fn openai_subtraction_clamps_at_zero() {
    let usage = normalize_usage(
        UsageShape::OpenAiResponses,
        &json!({
            "input_tokens": 10,
            "input_tokens_details": {"cached_tokens": 25}
        }),
    );
    assert_eq!(usage.get("input"), Some(&0));
    assert_eq!(usage.get("input_cached"), Some(&25));
}

#[test]
fn anthropic_cache_counts_are_additive() {
    let usage = normalize_usage(
        UsageShape::Anthropic,
        &json!({
            "input_tokens": 12,
            "output_tokens": 8,
            "cache_read_input_tokens": 100
        }),
    );
    assert_eq!(usage.get("input"), Some(&12));
    assert_eq!(usage.get("input_cache_read"), Some(&100));
    assert_eq!(usage.get("total"), Some(&120));
}

#[test]
fn generic_keeps_integer_fields_only() {
    let usage = normalize_usage(
        UsageShape::Generic,
        &json!({"tokens": 5, "model": "x", "ratio": 0.5}),
    );
    assert_eq!(usage.len(), 1);
    assert_eq!(usage.get("tokens"), Some(&5));
}
