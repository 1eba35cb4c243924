use std::collections::HashMap;
use std::time::Duration;

use tracelane_otel::{
    ExportMode, TracelaneConfig, TracelaneError, DEFAULT_BASE_URL, DEFAULT_FLUSH_AT,
    DEFAULT_TIMEOUT,
};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

#[test]
fn defaults_apply_without_overrides() {
    let config = TracelaneConfig::builder()
        .build_with_lookup(lookup(&[]))
        .unwrap();

    assert_eq!(config.base_url, DEFAULT_BASE_URL);
    assert_eq!(config.flush_at, DEFAULT_FLUSH_AT);
    assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    assert_eq!(config.export_mode, ExportMode::Batched);
    assert!(!config.has_credentials());
    assert!(config.agent.is_none());
}

#[test]
fn environment_fills_unset_fields() {
    let config = TracelaneConfig::builder()
        .build_with_lookup(lookup(&[
            ("TRACELANE_PUBLIC_KEY", "pk-env"),
            ("TRACELANE_SECRET_KEY", "sk-env"),
            ("TRACELANE_BASE_URL", "http://localhost:3000"),
            ("TRACELANE_FLUSH_AT", "10"),
            ("TRACELANE_FLUSH_INTERVAL", "0.5"),
            ("TRACELANE_TIMEOUT", "2"),
            ("TRACELANE_EXPORT_MODE", "immediate"),
            ("TRACELANE_TRACING_ENVIRONMENT", "staging"),
            ("TRACELANE_RELEASE", "v1.2.3"),
            ("TRACELANE_PROJECT_ID", "proj-env"),
            ("TRACELANE_ADDITIONAL_HEADERS", "x-team=core"),
        ]))
        .unwrap();

    assert_eq!(config.public_key.as_deref(), Some("pk-env"));
    assert!(config.has_credentials());
    assert_eq!(config.base_url, "http://localhost:3000");
    assert_eq!(config.flush_at, 10);
    assert_eq!(config.flush_interval, Duration::from_millis(500));
    assert_eq!(config.timeout, Duration::from_secs(2));
    assert_eq!(config.export_mode, ExportMode::Immediate);
    assert_eq!(config.environment.as_deref(), Some("staging"));
    assert_eq!(config.release.as_deref(), Some("v1.2.3"));
    assert_eq!(config.project_id.as_deref(), Some("proj-env"));
    assert_eq!(
        config.additional_headers.get("x-team").map(String::as_str),
        Some("core")
    );
}

#[test]
fn builder_values_take_precedence_over_environment() {
    let config = TracelaneConfig::builder()
        .public_key("pk-arg")
        .environment("production")
        .export_mode(ExportMode::Batched)
        .flush_at(3)
        .build_with_lookup(lookup(&[
            ("TRACELANE_PUBLIC_KEY", "pk-env"),
            ("TRACELANE_TRACING_ENVIRONMENT", "staging"),
            ("TRACELANE_EXPORT_MODE", "immediate"),
            ("TRACELANE_FLUSH_AT", "10"),
        ]))
        .unwrap();

    assert_eq!(config.public_key.as_deref(), Some("pk-arg"));
    assert_eq!(config.environment.as_deref(), Some("production"));
    assert_eq!(config.export_mode, ExportMode::Batched);
    assert_eq!(config.flush_at, 3);
}

#[test]
fn invalid_values_are_rejected() {
    let err = TracelaneConfig::builder()
        .build_with_lookup(lookup(&[("TRACELANE_EXPORT_MODE", "sometimes")]))
        .unwrap_err();
    assert!(matches!(err, TracelaneError::Config(_)));

    let err = TracelaneConfig::builder()
        .build_with_lookup(lookup(&[("TRACELANE_FLUSH_AT", "many")]))
        .unwrap_err();
    assert!(matches!(err, TracelaneError::Config(_)));

    let err = TracelaneConfig::builder()
        .base_url("not a url")
        .build_with_lookup(lookup(&[]))
        .unwrap_err();
    assert!(matches!(err, TracelaneError::Config(_)));
}

#[test]
fn debug_output_redacts_secret_key() {
    let config = TracelaneConfig::builder()
        .public_key("pk")
        .secret_key("super-secret")
        .build_with_lookup(lookup(&[]))
        .unwrap();
    let rendered = format!("{config:?}");
    assert!(!rendered.contains("super-secret"));
    assert!(rendered.contains("<redacted>"));
}
