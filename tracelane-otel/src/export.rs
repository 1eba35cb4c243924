use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracelane_core::SpanData;

use crate::otlp::encode_spans;
use crate::{ExportError, TracelaneClient};

/// Delivers finished spans to a backend.
#[async_trait]
pub trait SpanExporter: Send + Sync {
    async fn export(&self, batch: Vec<SpanData>) -> Result<(), ExportError>;

    async fn shutdown(&self) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Sends spans to the Tracelane OTLP/HTTP endpoint as JSON.
#[derive(Clone)]
pub struct HttpSpanExporter {
    client: TracelaneClient,
}

impl HttpSpanExporter {
    pub fn new(client: TracelaneClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SpanExporter for HttpSpanExporter {
    async fn export(&self, batch: Vec<SpanData>) -> Result<(), ExportError> {
        if batch.is_empty() {
            return Ok(());
        }
        let payload = encode_spans(&batch);
        self.client.export_traces(&payload).await?;
        tracing::debug!(spans = batch.len(), "exported span batch");
        Ok(())
    }
}

/// Keeps exported spans in memory. Intended for tests.
#[derive(Clone, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
    batches: Arc<Mutex<usize>>,
}

impl InMemorySpanExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn batch_count(&self) -> usize {
        *self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reset(&self) {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.batches.lock().unwrap_or_else(PoisonError::into_inner) = 0;
    }
}

#[async_trait]
impl SpanExporter for InMemorySpanExporter {
    async fn export(&self, batch: Vec<SpanData>) -> Result<(), ExportError> {
        *self.batches.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(batch);
        Ok(())
    }
}
