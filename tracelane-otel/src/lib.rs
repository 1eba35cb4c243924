//! Span processing and export pipeline for Tracelane.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tracelane_core::{AgentConfig, Resource};
//! use tracelane_otel::{
//!     SpanLifecycleProcessor, TracelaneConfig, TracerAccess, TracerProvider,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TracelaneConfig::builder()
//!         .public_key("pk-...")
//!         .secret_key("sk-...")
//!         .environment("production")
//!         .agent(AgentConfig::new("support_agent").with_display_name("Support Bot"))
//!         .build()?;
//!
//!     let processor = SpanLifecycleProcessor::builder(config).build()?;
//!     let access = TracerAccess::initialize(
//!         TracerProvider::noop(),
//!         Arc::new(processor.clone()),
//!         Resource::default(),
//!     );
//!
//!     let mut span = access.tracer().start_span("answer-question");
//!     span.set_attribute("tracelane.observation.input", "What is 2+2?");
//!     span.end();
//!
//!     access.provider().shutdown().await?;
//!     Ok(())
//! }
//! ```
mod agent;
mod client;
mod config;
mod error;
mod export;
mod lifecycle;
pub mod media;
mod otlp;
mod pending;
mod span_processor;
mod tracer;

pub use agent::{AgentResolver, AgentState};
pub use client::{
    AgentDisplayNameResponse, MediaUploadReport, MediaUploadRequest, MediaUploadResponse,
    Project, ProjectsResponse, TracelaneClient,
};
pub use config::{
    ExportMode, TracelaneConfig, TracelaneConfigBuilder, DEFAULT_BASE_URL, DEFAULT_FLUSH_AT,
    DEFAULT_FLUSH_INTERVAL, DEFAULT_TIMEOUT,
};
pub use error::{BoxError, ExportError, TracelaneError};
pub use export::{HttpSpanExporter, InMemorySpanExporter, SpanExporter};
pub use lifecycle::{
    is_default_export_span, ExportPredicate, Mask, SpanLifecycleProcessor,
    SpanLifecycleProcessorBuilder, MASK_FAILED,
};
pub use media::MediaService;
pub use otlp::encode_spans;
pub use pending::PendingTasks;
pub use span_processor::{BatchConfig, BatchSpanProcessor, SimpleSpanProcessor, SpanProcessor};
pub use tracer::{ActiveSpan, Tracer, TracerAccess, TracerProvider, TracerProviderBuilder, SDK_SCOPE_NAME};
