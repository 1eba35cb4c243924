//! Mapping of trace- and observation-level fields into the span attribute
//! namespace understood by the Tracelane backend.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::{AttributeValue, Attributes};

pub const SERIALIZATION_FAILED: &str = "<failed to serialize>";

pub const TRACE_NAME: &str = "tracelane.trace.name";
pub const TRACE_USER_ID: &str = "user.id";
pub const TRACE_SESSION_ID: &str = "session.id";
pub const TRACE_INPUT: &str = "tracelane.trace.input";
pub const TRACE_OUTPUT: &str = "tracelane.trace.output";
pub const TRACE_TAGS: &str = "tracelane.trace.tags";
pub const TRACE_PUBLIC: &str = "tracelane.trace.public";
pub const TRACE_METADATA: &str = "tracelane.trace.metadata";

pub const VERSION: &str = "tracelane.version";
pub const RELEASE: &str = "tracelane.release";
pub const ENVIRONMENT: &str = "tracelane.environment";

pub const OBSERVATION_TYPE: &str = "tracelane.observation.type";
pub const OBSERVATION_LEVEL: &str = "tracelane.observation.level";
pub const OBSERVATION_STATUS_MESSAGE: &str = "tracelane.observation.status_message";
pub const OBSERVATION_INPUT: &str = "tracelane.observation.input";
pub const OBSERVATION_OUTPUT: &str = "tracelane.observation.output";
pub const OBSERVATION_METADATA: &str = "tracelane.observation.metadata";
pub const OBSERVATION_MODEL: &str = "tracelane.observation.model.name";
pub const OBSERVATION_MODEL_PARAMETERS: &str = "tracelane.observation.model.parameters";
pub const OBSERVATION_USAGE_DETAILS: &str = "tracelane.observation.usage_details";
pub const OBSERVATION_COST_DETAILS: &str = "tracelane.observation.cost_details";
pub const OBSERVATION_COMPLETION_START_TIME: &str = "tracelane.observation.completion_start_time";
pub const OBSERVATION_PROMPT_NAME: &str = "tracelane.observation.prompt.name";
pub const OBSERVATION_PROMPT_VERSION: &str = "tracelane.observation.prompt.version";

pub const AGENT_ID: &str = "agent_id";
pub const AGENT_NAME: &str = "agent_name";
pub const AGENT_DISPLAY_NAME: &str = "agent_display_name";
pub const PROJECT_ID: &str = "project_id";

/// Attributes whose values carry user payloads. Masking and media
/// extraction only touch these keys (and their flattened metadata children).
pub const MASKABLE_ATTRIBUTES: &[&str] = &[
    TRACE_INPUT,
    TRACE_OUTPUT,
    TRACE_METADATA,
    OBSERVATION_INPUT,
    OBSERVATION_OUTPUT,
    OBSERVATION_METADATA,
];

pub fn is_maskable_attribute(key: &str) -> bool {
    MASKABLE_ATTRIBUTES.iter().any(|maskable| {
        key == *maskable
            || key
                .strip_prefix(maskable)
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

/// Semantic type of an observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObservationType {
    Span,
    Generation,
    Event,
    Agent,
    Tool,
    Chain,
    Retriever,
    Evaluator,
    Embedding,
    Guardrail,
}

impl ObservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationType::Span => "span",
            ObservationType::Generation => "generation",
            ObservationType::Event => "event",
            ObservationType::Agent => "agent",
            ObservationType::Tool => "tool",
            ObservationType::Chain => "chain",
            ObservationType::Retriever => "retriever",
            ObservationType::Evaluator => "evaluator",
            ObservationType::Embedding => "embedding",
            ObservationType::Guardrail => "guardrail",
        }
    }
}

impl fmt::Display for ObservationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservationLevel {
    Debug,
    Default,
    Warning,
    Error,
}

impl ObservationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationLevel::Debug => "DEBUG",
            ObservationLevel::Default => "DEFAULT",
            ObservationLevel::Warning => "WARNING",
            ObservationLevel::Error => "ERROR",
        }
    }
}

/// Which metadata namespace a flattened metadata map belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetadataScope {
    Trace,
    Observation,
}

impl MetadataScope {
    pub fn key(&self) -> &'static str {
        match self {
            MetadataScope::Trace => TRACE_METADATA,
            MetadataScope::Observation => OBSERVATION_METADATA,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TraceAttributes {
    pub name: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub metadata: Option<Value>,
    pub tags: Option<Vec<String>>,
    pub environment: Option<String>,
    pub public: Option<bool>,
}

/// Prompt a generation was rendered from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptLink {
    pub name: String,
    pub version: i64,
    /// Set when the requested prompt could not be fetched and a local
    /// fallback was used instead.
    pub is_fallback: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ObservationAttributes {
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub metadata: Option<Value>,
    pub version: Option<String>,
    pub level: Option<ObservationLevel>,
    pub status_message: Option<String>,
    pub model: Option<String>,
    pub model_parameters: Option<Value>,
    pub usage_details: Option<Value>,
    pub cost_details: Option<Value>,
    pub completion_start_time: Option<DateTime<Utc>>,
    pub prompt: Option<PromptLink>,
}

/// Serializes a payload for use as an attribute value.
///
/// Strings pass through untouched; anything else is JSON-encoded. A value
/// that fails to serialize becomes [`SERIALIZATION_FAILED`].
pub fn serialize_attribute<T: Serialize + ?Sized>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(text)) => text,
        Ok(other) => other.to_string(),
        Err(_) => SERIALIZATION_FAILED.to_string(),
    }
}

pub fn create_trace_attributes(fields: &TraceAttributes) -> Attributes {
    let mut attributes = Attributes::new();
    insert_opt(&mut attributes, TRACE_NAME, fields.name.clone());
    insert_opt(&mut attributes, TRACE_USER_ID, fields.user_id.clone());
    insert_opt(&mut attributes, TRACE_SESSION_ID, fields.session_id.clone());
    insert_opt(&mut attributes, VERSION, fields.version.clone());
    insert_opt(&mut attributes, RELEASE, fields.release.clone());
    insert_opt(&mut attributes, TRACE_INPUT, payload(&fields.input));
    insert_opt(&mut attributes, TRACE_OUTPUT, payload(&fields.output));
    insert_opt(&mut attributes, TRACE_TAGS, fields.tags.clone());
    insert_opt(&mut attributes, ENVIRONMENT, fields.environment.clone());
    insert_opt(&mut attributes, TRACE_PUBLIC, fields.public);
    if let Some(metadata) = fields.metadata.as_ref().filter(|m| !m.is_null()) {
        attributes.extend(flatten_metadata(metadata, MetadataScope::Trace));
    }
    attributes
}

pub fn create_observation_attributes(
    observation_type: ObservationType,
    fields: &ObservationAttributes,
) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert(
        OBSERVATION_TYPE.to_string(),
        AttributeValue::from(observation_type.as_str()),
    );
    insert_opt(
        &mut attributes,
        OBSERVATION_LEVEL,
        fields.level.map(|level| level.as_str().to_string()),
    );
    insert_opt(
        &mut attributes,
        OBSERVATION_STATUS_MESSAGE,
        fields.status_message.clone(),
    );
    insert_opt(&mut attributes, VERSION, fields.version.clone());
    insert_opt(&mut attributes, OBSERVATION_INPUT, payload(&fields.input));
    insert_opt(&mut attributes, OBSERVATION_OUTPUT, payload(&fields.output));
    insert_opt(&mut attributes, OBSERVATION_MODEL, fields.model.clone());
    insert_opt(
        &mut attributes,
        OBSERVATION_MODEL_PARAMETERS,
        payload(&fields.model_parameters),
    );
    insert_opt(
        &mut attributes,
        OBSERVATION_USAGE_DETAILS,
        payload(&fields.usage_details),
    );
    insert_opt(
        &mut attributes,
        OBSERVATION_COST_DETAILS,
        payload(&fields.cost_details),
    );
    insert_opt(
        &mut attributes,
        OBSERVATION_COMPLETION_START_TIME,
        fields
            .completion_start_time
            .map(|time| serialize_attribute(&time)),
    );
    // A fallback prompt was not the one requested; linking it would
    // misattribute the generation.
    if let Some(prompt) = fields.prompt.as_ref().filter(|p| !p.is_fallback) {
        attributes.insert(
            OBSERVATION_PROMPT_NAME.to_string(),
            AttributeValue::from(prompt.name.clone()),
        );
        attributes.insert(
            OBSERVATION_PROMPT_VERSION.to_string(),
            AttributeValue::I64(prompt.version),
        );
    }
    if let Some(metadata) = fields.metadata.as_ref().filter(|m| !m.is_null()) {
        attributes.extend(flatten_metadata(metadata, MetadataScope::Observation));
    }
    attributes
}

/// Flattens metadata one level deep under the scope's metadata key.
///
/// `{"a": {"b": 1}, "c": "x"}` becomes `scope.a = "{\"b\":1}"` and
/// `scope.c = "x"`. Non-object metadata is stored whole under the scope key.
pub fn flatten_metadata(metadata: &Value, scope: MetadataScope) -> Attributes {
    let prefix = scope.key();
    let mut attributes = Attributes::new();
    match metadata {
        Value::Object(map) => {
            for (key, value) in map {
                if value.is_null() {
                    continue;
                }
                attributes.insert(
                    format!("{prefix}.{key}"),
                    AttributeValue::String(serialize_attribute(value)),
                );
            }
        }
        Value::Null => {}
        other => {
            attributes.insert(
                prefix.to_string(),
                AttributeValue::String(serialize_attribute(other)),
            );
        }
    }
    attributes
}

fn payload(value: &Option<Value>) -> Option<String> {
    value
        .as_ref()
        .filter(|v| !v.is_null())
        .map(serialize_attribute)
}

fn insert_opt<V: Into<AttributeValue>>(attributes: &mut Attributes, key: &str, value: Option<V>) {
    if let Some(value) = value {
        attributes.insert(key.to_string(), value.into());
    }
}
