//! The span lifecycle processor.
//!
//! Sits in front of a delivery processor. On start it tags spans with the
//! environment, release and (once resolved) agent identity. On end it runs,
//! in the background and in this order: the export predicate, masking,
//! media extraction, a debug snapshot, and finally hands the span to the
//! delivery processor.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracelane_core::attributes::{
    is_maskable_attribute, AGENT_DISPLAY_NAME, AGENT_ID, AGENT_NAME, ENVIRONMENT, PROJECT_ID,
    RELEASE,
};
use tracelane_core::{AttributeValue, ResolvedAgentConfig, SpanContext, SpanData};
use tracing::Level;

use crate::agent::{AgentResolver, AgentState};
use crate::config::ExportMode;
use crate::media::MediaService;
use crate::pending::PendingTasks;
use crate::span_processor::{BatchConfig, BatchSpanProcessor, SimpleSpanProcessor, SpanProcessor};
use crate::tracer::SDK_SCOPE_NAME;
use crate::{
    BoxError, ExportError, HttpSpanExporter, SpanExporter, TracelaneClient, TracelaneConfig,
    TracelaneError,
};

/// Value written in place of an attribute whose masking failed.
pub const MASK_FAILED: &str = "<fully masked due to failed mask function>";

/// Redacts a single payload attribute before export.
pub trait Mask: Send + Sync {
    fn mask(&self, data: &AttributeValue) -> Result<AttributeValue, BoxError>;
}

impl<F> Mask for F
where
    F: Fn(&AttributeValue) -> Result<AttributeValue, BoxError> + Send + Sync,
{
    fn mask(&self, data: &AttributeValue) -> Result<AttributeValue, BoxError> {
        self(data)
    }
}

/// Decides whether an ended span is sent to the backend.
pub trait ExportPredicate: Send + Sync {
    fn should_export(&self, span: &SpanData) -> bool;
}

impl<F> ExportPredicate for F
where
    F: Fn(&SpanData) -> bool + Send + Sync,
{
    fn should_export(&self, span: &SpanData) -> bool {
        self(span)
    }
}

const KNOWN_LLM_SCOPES: &[&str] = &[
    "openinference",
    "opentelemetry.instrumentation.openai",
    "opentelemetry.instrumentation.anthropic",
    "langsmith",
    "litellm",
    "ai",
];

/// Export predicate that keeps spans created by this SDK, spans carrying
/// gen-ai or Tracelane attributes, and spans from known LLM
/// instrumentation scopes.
pub fn is_default_export_span(span: &SpanData) -> bool {
    if span.scope.name == SDK_SCOPE_NAME {
        return true;
    }
    if span
        .attributes
        .keys()
        .any(|key| key.starts_with("gen_ai.") || key.starts_with("tracelane."))
    {
        return true;
    }
    KNOWN_LLM_SCOPES.iter().any(|prefix| {
        span.scope.name == *prefix
            || span
                .scope
                .name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

#[derive(Clone)]
pub struct SpanLifecycleProcessor {
    inner: Arc<LifecycleInner>,
}

struct LifecycleInner {
    delegate: Arc<dyn SpanProcessor>,
    media: Option<MediaService>,
    mask: Option<Arc<dyn Mask>>,
    should_export: Option<Arc<dyn ExportPredicate>>,
    environment: Option<String>,
    release: Option<String>,
    agent: AgentResolver,
    pending: PendingTasks,
    is_shutdown: AtomicBool,
}

impl SpanLifecycleProcessor {
    pub fn builder(config: TracelaneConfig) -> SpanLifecycleProcessorBuilder {
        SpanLifecycleProcessorBuilder {
            config,
            mask: None,
            should_export: None,
            exporter: None,
            delegate: None,
            media_enabled: true,
        }
    }

    pub fn agent_state(&self) -> AgentState {
        self.inner.agent.state()
    }

    pub fn resolved_agent(&self) -> Option<Arc<ResolvedAgentConfig>> {
        self.inner.agent.resolved()
    }

    /// Waits for agent resolution to settle. Returns immediately when no
    /// agent is configured.
    pub async fn wait_for_agent(&self) -> AgentState {
        self.inner.agent.wait_settled().await
    }

    pub fn pending_operations(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::Acquire)
    }

    async fn settle_pending(&self) {
        self.inner.pending.wait().await;
        if let Some(media) = &self.inner.media {
            media.flush().await;
        }
    }
}

impl LifecycleInner {
    fn finish_span(&self, mut span: SpanData) {
        if !self.is_exportable(&span) {
            tracing::debug!(span_name = %span.name, "span not exportable; dropped");
            return;
        }
        self.apply_mask(&mut span);
        if let Some(media) = &self.media {
            media.process(&mut span);
        }
        if tracing::enabled!(Level::DEBUG) {
            tracing::debug!(
                span_name = %span.name,
                span = %span.snapshot(),
                "span processed"
            );
        }
        self.delegate.on_end(span);
    }

    fn is_exportable(&self, span: &SpanData) -> bool {
        let Some(predicate) = &self.should_export else {
            return true;
        };
        match catch_unwind(AssertUnwindSafe(|| predicate.should_export(span))) {
            Ok(decision) => decision,
            Err(_) => {
                tracing::error!(
                    span_name = %span.name,
                    "export predicate panicked; span dropped"
                );
                false
            }
        }
    }

    fn apply_mask(&self, span: &mut SpanData) {
        let Some(mask) = &self.mask else {
            return;
        };
        for (key, value) in span.attributes.iter_mut() {
            if !is_maskable_attribute(key) {
                continue;
            }
            let masked = match catch_unwind(AssertUnwindSafe(|| mask.mask(value))) {
                Ok(Ok(masked)) => masked,
                Ok(Err(err)) => {
                    tracing::warn!(attribute = %key, error = %err, "mask function failed");
                    AttributeValue::from(MASK_FAILED)
                }
                Err(_) => {
                    tracing::warn!(attribute = %key, "mask function panicked");
                    AttributeValue::from(MASK_FAILED)
                }
            };
            *value = masked;
        }
    }

    fn stamp_agent(span: &mut SpanData, agent: &ResolvedAgentConfig) {
        span.set_attribute(AGENT_ID, agent.agent_id.clone());
        span.set_attribute(AGENT_NAME, agent.agent_name.clone());
        if let Some(display_name) = &agent.agent_display_name {
            span.set_attribute(AGENT_DISPLAY_NAME, display_name.clone());
        }
        span.set_attribute(PROJECT_ID, agent.project_id.clone());
    }
}

#[async_trait]
impl SpanProcessor for SpanLifecycleProcessor {
    fn on_start(&self, span: &mut SpanData, parent: Option<&SpanContext>) {
        if let Some(environment) = &self.inner.environment {
            span.set_attribute(ENVIRONMENT, environment.clone());
        }
        if let Some(release) = &self.inner.release {
            span.set_attribute(RELEASE, release.clone());
        }
        // Spans started before resolution settles stay untagged.
        if let Some(agent) = self.inner.agent.resolved() {
            LifecycleInner::stamp_agent(span, &agent);
        }
        self.inner.delegate.on_start(span, parent);
    }

    fn on_end(&self, span: SpanData) {
        if self.is_shutdown() {
            tracing::warn!(span_name = %span.name, "span ended after shutdown; dropped");
            return;
        }
        let inner = self.inner.clone();
        self.inner.pending.spawn("span_end", async move {
            inner.finish_span(span);
        });
    }

    async fn force_flush(&self) -> Result<(), ExportError> {
        self.settle_pending().await;
        self.inner.delegate.force_flush().await
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        if self.inner.is_shutdown.swap(true, Ordering::AcqRel) {
            return Err(ExportError::Shutdown);
        }
        self.settle_pending().await;
        self.inner.agent.abort();
        self.inner.delegate.shutdown().await
    }
}

pub struct SpanLifecycleProcessorBuilder {
    config: TracelaneConfig,
    mask: Option<Arc<dyn Mask>>,
    should_export: Option<Arc<dyn ExportPredicate>>,
    exporter: Option<Arc<dyn SpanExporter>>,
    delegate: Option<Arc<dyn SpanProcessor>>,
    media_enabled: bool,
}

impl SpanLifecycleProcessorBuilder {
    pub fn mask(mut self, mask: impl Mask + 'static) -> Self {
        self.mask = Some(Arc::new(mask));
        self
    }

    pub fn should_export(mut self, predicate: impl ExportPredicate + 'static) -> Self {
        self.should_export = Some(Arc::new(predicate));
        self
    }

    /// Replaces the HTTP exporter. The export mode still selects immediate
    /// or batched delivery.
    pub fn exporter(mut self, exporter: Arc<dyn SpanExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Replaces the delivery processor entirely.
    pub fn span_processor(mut self, delegate: Arc<dyn SpanProcessor>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn media_upload(mut self, enabled: bool) -> Self {
        self.media_enabled = enabled;
        self
    }

    /// Builds the processor. Agent resolution, when configured, starts in
    /// the background; the call does not wait for it.
    pub fn build(self) -> Result<SpanLifecycleProcessor, TracelaneError> {
        let config = self.config;
        let client = TracelaneClient::new(&config)?;

        let delegate = match self.delegate {
            Some(delegate) => delegate,
            None => {
                let exporter = self
                    .exporter
                    .unwrap_or_else(|| Arc::new(HttpSpanExporter::new(client.clone())));
                match config.export_mode {
                    ExportMode::Immediate => {
                        Arc::new(SimpleSpanProcessor::new(exporter)) as Arc<dyn SpanProcessor>
                    }
                    ExportMode::Batched => Arc::new(BatchSpanProcessor::new(
                        exporter,
                        BatchConfig::from_config(&config),
                    )),
                }
            }
        };

        let media = self
            .media_enabled
            .then(|| MediaService::new(client.clone(), config.max_concurrent_uploads));

        let agent = match config.agent.clone() {
            Some(agent) => AgentResolver::start(agent, config.project_id.clone(), client),
            None => AgentResolver::disabled(),
        };

        Ok(SpanLifecycleProcessor {
            inner: Arc::new(LifecycleInner {
                delegate,
                media,
                mask: self.mask,
                should_export: self.should_export,
                environment: config.environment,
                release: config.release,
                agent,
                pending: PendingTasks::new(),
                is_shutdown: AtomicBool::new(false),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use tracelane_core::InstrumentationScope;

    use super::*;

    #[test]
    fn default_predicate_keeps_llm_spans() {
        let mut span = SpanData::new("http", SpanContext::new_root());
        span.scope = InstrumentationScope::new("reqwest");
        assert!(!is_default_export_span(&span));

        span.scope = InstrumentationScope::new("openinference.instrumentation.openai");
        assert!(is_default_export_span(&span));

        span.scope = InstrumentationScope::new("aiohttp");
        assert!(!is_default_export_span(&span));

        span.scope = InstrumentationScope::new("reqwest");
        span.set_attribute("gen_ai.request.model", "gpt-4o");
        assert!(is_default_export_span(&span));
    }
}
