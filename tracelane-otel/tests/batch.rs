use std::sync::Arc;
use std::time::Duration;

use tracelane_core::{SpanContext, SpanData};
use tracelane_otel::{
    BatchConfig, BatchSpanProcessor, ExportError, InMemorySpanExporter, SimpleSpanProcessor,
    SpanProcessor,
};

fn span(name: &str) -> SpanData {
    SpanData::new(name, SpanContext::new_root())
}

fn names(exporter: &InMemorySpanExporter) -> Vec<String> {
    exporter
        .finished_spans()
        .into_iter()
        .map(|span| span.name)
        .collect()
}

#[tokio::test]
async fn full_queue_drops_the_oldest_span() {
    let exporter = InMemorySpanExporter::new();
    let processor = BatchSpanProcessor::new(
        Arc::new(exporter.clone()),
        BatchConfig {
            max_batch_size: 100,
            flush_interval: Duration::from_secs(3600),
            max_queue_size: 3,
        },
    );

    for i in 0..5 {
        processor.on_end(span(&format!("span-{i}")));
    }
    assert_eq!(processor.dropped_spans(), 2);
    assert_eq!(processor.queued_spans(), 3);

    processor.force_flush().await.unwrap();
    assert_eq!(names(&exporter), vec!["span-2", "span-3", "span-4"]);
    assert_eq!(processor.queued_spans(), 0);
}

#[tokio::test]
async fn force_flush_exports_in_batches_of_max_size() {
    let exporter = InMemorySpanExporter::new();
    let processor = BatchSpanProcessor::new(
        Arc::new(exporter.clone()),
        BatchConfig {
            max_batch_size: 4,
            flush_interval: Duration::from_secs(3600),
            max_queue_size: 100,
        },
    );

    for i in 0..10 {
        processor.on_end(span(&format!("span-{i}")));
    }
    processor.force_flush().await.unwrap();

    assert_eq!(exporter.finished_spans().len(), 10);
    assert_eq!(exporter.batch_count(), 3);
}

#[tokio::test]
async fn reaching_batch_size_triggers_an_export() {
    let exporter = InMemorySpanExporter::new();
    let processor = BatchSpanProcessor::new(
        Arc::new(exporter.clone()),
        BatchConfig {
            max_batch_size: 2,
            flush_interval: Duration::from_secs(3600),
            max_queue_size: 100,
        },
    );

    processor.on_end(span("a"));
    processor.on_end(span("b"));

    let exported = tokio::time::timeout(Duration::from_secs(5), async {
        while exporter.finished_spans().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(exported.is_ok(), "batch was not exported");
    assert_eq!(names(&exporter), vec!["a", "b"]);
}

#[tokio::test]
async fn flush_interval_exports_partial_batches() {
    let exporter = InMemorySpanExporter::new();
    let processor = BatchSpanProcessor::new(
        Arc::new(exporter.clone()),
        BatchConfig {
            max_batch_size: 100,
            flush_interval: Duration::from_millis(50),
            max_queue_size: 100,
        },
    );

    processor.on_end(span("lonely"));

    let exported = tokio::time::timeout(Duration::from_secs(5), async {
        while exporter.finished_spans().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(exported.is_ok(), "interval flush did not run");
}

#[tokio::test]
async fn shutdown_flushes_and_rejects_later_spans() {
    let exporter = InMemorySpanExporter::new();
    let processor = BatchSpanProcessor::new(Arc::new(exporter.clone()), BatchConfig::default());

    processor.on_end(span("queued"));
    processor.shutdown().await.unwrap();
    processor.on_end(span("late"));
    processor.force_flush().await.unwrap();

    assert_eq!(names(&exporter), vec!["queued"]);
}

#[tokio::test]
async fn simple_processor_exports_each_span_on_its_own() {
    let exporter = InMemorySpanExporter::new();
    let processor = SimpleSpanProcessor::new(Arc::new(exporter.clone()));

    for i in 0..3 {
        processor.on_end(span(&format!("span-{i}")));
    }
    processor.force_flush().await.unwrap();

    assert_eq!(exporter.finished_spans().len(), 3);
    assert_eq!(exporter.batch_count(), 3);
}

#[tokio::test]
async fn second_shutdown_is_rejected() {
    let processor = SimpleSpanProcessor::new(Arc::new(InMemorySpanExporter::new()));
    processor.shutdown().await.unwrap();
    assert!(matches!(processor.shutdown().await, Err(ExportError::Shutdown)));
}
