//! Core types for Tracelane: the span model, attribute mapping, agent
//! identity and provider-specific helpers. Nothing in this crate performs
//! I/O.

pub mod agent;
pub mod attributes;
mod error;
pub mod messages;
mod span;
pub mod usage;
mod value;

pub use agent::{
    generate_agent_id, resolve_agent_config, AgentConfig, ResolvedAgentConfig,
    MAX_AGENT_NAME_CHARS,
};
pub use attributes::{
    create_observation_attributes, create_trace_attributes, flatten_metadata,
    serialize_attribute, MetadataScope, ObservationAttributes, ObservationLevel, ObservationType,
    PromptLink, TraceAttributes,
};
pub use error::CoreError;
pub use messages::{messages_to_value, ChatMessage, ToolCall};
pub use span::{InstrumentationScope, Resource, SpanContext, SpanData, SpanStatus};
pub use usage::{normalize_usage, UsageDetails, UsageShape};
pub use value::{AttributeValue, Attributes};
