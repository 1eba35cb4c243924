use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use tracelane_core::{
    create_observation_attributes, create_trace_attributes, AttributeValue, Attributes,
    InstrumentationScope, ObservationAttributes, ObservationType, Resource, SpanContext, SpanData,
    SpanStatus, TraceAttributes,
};

use crate::span_processor::SpanProcessor;
use crate::ExportError;

/// Instrumentation scope of spans created through [`TracerAccess::tracer`].
pub const SDK_SCOPE_NAME: &str = "tracelane-sdk";

/// Owns the span processors and hands out tracers.
#[derive(Clone, Default)]
pub struct TracerProvider {
    inner: Arc<ProviderInner>,
}

#[derive(Default)]
struct ProviderInner {
    processors: Vec<Arc<dyn SpanProcessor>>,
    resource: Resource,
}

impl TracerProvider {
    pub fn builder() -> TracerProviderBuilder {
        TracerProviderBuilder::default()
    }

    /// A provider without processors; spans it creates go nowhere.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn tracer(&self, scope: impl Into<String>) -> Tracer {
        Tracer {
            provider: self.clone(),
            scope: InstrumentationScope::new(scope),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.inner.processors.is_empty()
    }

    pub async fn force_flush(&self) -> Result<(), ExportError> {
        let mut result = Ok(());
        for processor in &self.inner.processors {
            if let Err(err) = processor.force_flush().await {
                tracing::warn!(error = %err, "span processor flush failed");
                result = Err(err);
            }
        }
        result
    }

    pub async fn shutdown(&self) -> Result<(), ExportError> {
        let mut result = Ok(());
        for processor in &self.inner.processors {
            if let Err(err) = processor.shutdown().await {
                tracing::warn!(error = %err, "span processor shutdown failed");
                result = Err(err);
            }
        }
        result
    }

    fn same_as(&self, other: &TracerProvider) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[derive(Default)]
pub struct TracerProviderBuilder {
    processors: Vec<Arc<dyn SpanProcessor>>,
    resource: Resource,
}

impl TracerProviderBuilder {
    pub fn with_span_processor(mut self, processor: impl SpanProcessor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    pub fn with_shared_processor(mut self, processor: Arc<dyn SpanProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = resource;
        self
    }

    pub fn build(self) -> TracerProvider {
        TracerProvider {
            inner: Arc::new(ProviderInner {
                processors: self.processors,
                resource: self.resource,
            }),
        }
    }
}

#[derive(Clone)]
pub struct Tracer {
    provider: TracerProvider,
    scope: InstrumentationScope,
}

impl Tracer {
    pub fn start_span(&self, name: impl Into<String>) -> ActiveSpan {
        self.start(name.into(), SpanContext::new_root(), None)
    }

    pub fn start_child(&self, name: impl Into<String>, parent: &SpanContext) -> ActiveSpan {
        self.start(name.into(), parent.new_child(), Some(parent))
    }

    /// Starts a span typed as an observation, carrying its attributes.
    pub fn start_observation(
        &self,
        name: impl Into<String>,
        observation_type: ObservationType,
        fields: &ObservationAttributes,
        parent: Option<&SpanContext>,
    ) -> ActiveSpan {
        let name = name.into();
        let context = match parent {
            Some(parent) => parent.new_child(),
            None => SpanContext::new_root(),
        };
        let initial = create_observation_attributes(observation_type, fields);
        self.start_with_attributes(name, context, parent, initial)
    }

    fn start(&self, name: String, context: SpanContext, parent: Option<&SpanContext>) -> ActiveSpan {
        self.start_with_attributes(name, context, parent, Attributes::new())
    }

    fn start_with_attributes(
        &self,
        name: String,
        context: SpanContext,
        parent: Option<&SpanContext>,
        attributes: Attributes,
    ) -> ActiveSpan {
        let mut data = SpanData::new(name, context);
        data.parent_span_id = parent.map(|parent| parent.span_id.clone());
        data.attributes = attributes;
        data.resource = self.provider.inner.resource.clone();
        data.scope = self.scope.clone();
        for processor in &self.provider.inner.processors {
            processor.on_start(&mut data, parent);
        }
        ActiveSpan {
            data: Some(data),
            provider: self.provider.clone(),
        }
    }
}

/// A span that has started and not yet ended. Dropping it ends it.
pub struct ActiveSpan {
    data: Option<SpanData>,
    provider: TracerProvider,
}

impl ActiveSpan {
    pub fn context(&self) -> SpanContext {
        self.data
            .as_ref()
            .map(|data| data.span_context.clone())
            .unwrap_or_else(SpanContext::new_root)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if let Some(data) = self.data.as_mut() {
            data.set_attribute(key, value);
        }
    }

    pub fn set_attributes(&mut self, attributes: Attributes) {
        if let Some(data) = self.data.as_mut() {
            data.attributes.extend(attributes);
        }
    }

    pub fn update_trace(&mut self, fields: &TraceAttributes) {
        self.set_attributes(create_trace_attributes(fields));
    }

    pub fn update_observation(
        &mut self,
        observation_type: ObservationType,
        fields: &ObservationAttributes,
    ) {
        self.set_attributes(create_observation_attributes(observation_type, fields));
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        if let Some(data) = self.data.as_mut() {
            data.status = status;
        }
    }

    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        let Some(mut data) = self.data.take() else {
            return;
        };
        data.end_time = Some(Utc::now());
        let processors = &self.provider.inner.processors;
        if let Some((last, rest)) = processors.split_last() {
            for processor in rest {
                processor.on_end(data.clone());
            }
            last.on_end(data);
        }
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Explicit replacement for a process-wide tracer slot.
///
/// Holds the ambient provider and an optional isolated provider; the
/// isolated provider wins when set.
#[derive(Clone, Default)]
pub struct TracerAccess {
    ambient: TracerProvider,
    isolated: Arc<RwLock<Option<TracerProvider>>>,
}

impl TracerAccess {
    pub fn new(ambient: TracerProvider) -> Self {
        Self {
            ambient,
            isolated: Arc::new(RwLock::new(None)),
        }
    }

    /// Builds an access object whose isolated provider delivers through
    /// `processor`, falling back to `ambient` once the isolated provider is
    /// cleared.
    pub fn initialize(
        ambient: TracerProvider,
        processor: Arc<dyn SpanProcessor>,
        resource: Resource,
    ) -> Self {
        let isolated = TracerProvider::builder()
            .with_shared_processor(processor)
            .with_resource(resource)
            .build();
        let access = Self::new(ambient);
        access.set_isolated_provider(Some(isolated));
        access
    }

    pub fn set_isolated_provider(&self, provider: Option<TracerProvider>) {
        *self
            .isolated
            .write()
            .unwrap_or_else(PoisonError::into_inner) = provider;
    }

    pub fn has_isolated_provider(&self) -> bool {
        self.isolated
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn provider(&self) -> TracerProvider {
        self.isolated
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| self.ambient.clone())
    }

    pub fn is_using_ambient(&self) -> bool {
        self.provider().same_as(&self.ambient)
    }

    pub fn tracer(&self) -> Tracer {
        self.provider().tracer(SDK_SCOPE_NAME)
    }
}
