use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracelane_core::{SpanContext, SpanData};

use crate::pending::PendingTasks;
use crate::{ExportError, SpanExporter, TracelaneConfig};

/// Hooks invoked as spans start and end.
///
/// `on_start` runs synchronously while the span is still mutable.
/// `on_end` receives ownership of the finished span and must not block.
#[async_trait]
pub trait SpanProcessor: Send + Sync {
    fn on_start(&self, _span: &mut SpanData, _parent: Option<&SpanContext>) {}

    fn on_end(&self, span: SpanData);

    async fn force_flush(&self) -> Result<(), ExportError>;

    async fn shutdown(&self) -> Result<(), ExportError>;
}

/// Exports every span as soon as it ends.
pub struct SimpleSpanProcessor {
    exporter: Arc<dyn SpanExporter>,
    exports: PendingTasks,
    is_shutdown: AtomicBool,
}

impl SimpleSpanProcessor {
    pub fn new(exporter: Arc<dyn SpanExporter>) -> Self {
        Self {
            exporter,
            exports: PendingTasks::new(),
            is_shutdown: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SpanProcessor for SimpleSpanProcessor {
    fn on_end(&self, span: SpanData) {
        if self.is_shutdown.load(Ordering::Acquire) {
            tracing::warn!(span_name = %span.name, "span ended after shutdown; not exported");
            return;
        }
        let exporter = self.exporter.clone();
        self.exports.spawn("span_export", async move {
            if let Err(err) = exporter.export(vec![span]).await {
                tracing::error!(error = %err, "span export failed");
            }
        });
    }

    async fn force_flush(&self) -> Result<(), ExportError> {
        self.exports.wait().await;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return Err(ExportError::Shutdown);
        }
        self.exports.wait().await;
        self.exporter.shutdown().await
    }
}

#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub max_batch_size: usize,
    pub flush_interval: Duration,
    pub max_queue_size: usize,
}

impl BatchConfig {
    pub fn from_config(config: &TracelaneConfig) -> Self {
        Self {
            max_batch_size: config.flush_at,
            flush_interval: config.flush_interval,
            max_queue_size: config.max_queue_size,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: crate::config::DEFAULT_FLUSH_AT,
            flush_interval: crate::config::DEFAULT_FLUSH_INTERVAL,
            max_queue_size: crate::config::DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

/// Buffers ended spans and exports them in batches, when `max_batch_size`
/// spans are queued or every `flush_interval`, whichever comes first.
///
/// When the queue is full the oldest span is dropped and counted.
#[derive(Clone)]
pub struct BatchSpanProcessor {
    inner: Arc<BatchInner>,
}

struct BatchInner {
    exporter: Arc<dyn SpanExporter>,
    config: BatchConfig,
    queue: Mutex<VecDeque<SpanData>>,
    notify: Arc<Notify>,
    export_gate: tokio::sync::Mutex<()>,
    dropped_spans: AtomicU64,
    is_shutdown: AtomicBool,
}

impl BatchSpanProcessor {
    /// Creates the processor and, when called inside a tokio runtime,
    /// starts its background flush loop.
    pub fn new(exporter: Arc<dyn SpanExporter>, config: BatchConfig) -> Self {
        let config = BatchConfig {
            max_batch_size: config.max_batch_size.max(1),
            max_queue_size: config.max_queue_size.max(1),
            ..config
        };
        let processor = Self {
            inner: Arc::new(BatchInner {
                exporter,
                config,
                queue: Mutex::new(VecDeque::new()),
                notify: Arc::new(Notify::new()),
                export_gate: tokio::sync::Mutex::new(()),
                dropped_spans: AtomicU64::new(0),
                is_shutdown: AtomicBool::new(false),
            }),
        };
        processor.spawn_flush_loop();
        processor
    }

    pub fn dropped_spans(&self) -> u64 {
        self.inner.dropped_spans.load(Ordering::Relaxed)
    }

    pub fn queued_spans(&self) -> usize {
        self.inner.lock_queue().len()
    }

    fn spawn_flush_loop(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime; batched spans are exported only on force_flush");
            return;
        };
        let weak: Weak<BatchInner> = Arc::downgrade(&self.inner);
        let notify = self.inner.notify.clone();
        let flush_interval = self.inner.config.flush_interval;
        handle.spawn(async move {
            let mut interval = tokio::time::interval(flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = notify.notified() => {}
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.is_shutdown.load(Ordering::Acquire) {
                    break;
                }
                if let Err(err) = inner.export_queued().await {
                    tracing::warn!(error = %err, "scheduled span export failed");
                }
            }
        });
    }
}

impl BatchInner {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<SpanData>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain_batch(&self) -> Vec<SpanData> {
        let mut queue = self.lock_queue();
        let take = queue.len().min(self.config.max_batch_size);
        queue.drain(..take).collect()
    }

    /// Exports everything queued. Exports are serialized so a caller
    /// observes any export already in flight.
    async fn export_queued(&self) -> Result<(), ExportError> {
        let _gate = self.export_gate.lock().await;
        let mut last_error = None;
        loop {
            let batch = self.drain_batch();
            if batch.is_empty() {
                break;
            }
            let size = batch.len();
            if let Err(err) = self.exporter.export(batch).await {
                tracing::error!(error = %err, dropped = size, "span batch export failed");
                last_error = Some(err);
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SpanProcessor for BatchSpanProcessor {
    fn on_end(&self, span: SpanData) {
        if self.inner.is_shutdown.load(Ordering::Acquire) {
            tracing::warn!(span_name = %span.name, "span ended after shutdown; not exported");
            return;
        }
        let mut queue = self.inner.lock_queue();
        if queue.len() >= self.inner.config.max_queue_size {
            queue.pop_front();
            self.inner.dropped_spans.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(span);
        if queue.len() >= self.inner.config.max_batch_size {
            self.inner.notify.notify_one();
        }
    }

    async fn force_flush(&self) -> Result<(), ExportError> {
        self.inner.export_queued().await
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        if self.inner.is_shutdown.swap(true, Ordering::AcqRel) {
            return Err(ExportError::Shutdown);
        }
        self.inner.notify.notify_one();
        let flushed = self.inner.export_queued().await;
        self.inner.exporter.shutdown().await?;
        flushed
    }
}
