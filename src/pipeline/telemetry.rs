//! Pipeline telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct PipelineInstruments {
    submitted: Counter<u64>,
    flush_triggers: Counter<u64>,
    flush_duration_seconds: Histogram<f64>,
    flush_items: Histogram<u64>,
    items_dropped: Counter<u64>,
    batch_failures: Counter<u64>,
    backpressure_rejections: Counter<u64>,
}

fn instruments() -> &'static PipelineInstruments {
    static INSTRUMENTS: OnceLock<PipelineInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("telestore.pipeline");
        PipelineInstruments {
            submitted: meter
                .u64_counter("telestore.pipeline.submitted")
                .with_description("Write requests accepted by the pipeline")
                .init(),
            flush_triggers: meter
                .u64_counter("telestore.pipeline.flush.triggers")
                .with_description("Flush trigger counts by reason")
                .init(),
            flush_duration_seconds: meter
                .f64_histogram("telestore.pipeline.flush.duration")
                .with_description("Bulk write duration per batch")
                .with_unit("s")
                .init(),
            flush_items: meter
                .u64_histogram("telestore.pipeline.flush.items")
                .with_description("Requests per flushed batch")
                .init(),
            items_dropped: meter
                .u64_counter("telestore.pipeline.items.dropped")
                .with_description("Requests rejected by the backend and dropped")
                .init(),
            batch_failures: meter
                .u64_counter("telestore.pipeline.batch.failures")
                .with_description("Batches that failed as a whole")
                .init(),
            backpressure_rejections: meter
                .u64_counter("telestore.pipeline.backpressure.rejections")
                .with_description("Submits refused because the flush backlog was full")
                .init(),
        }
    })
}

pub fn record_submit(backend: &'static str) {
    instruments()
        .submitted
        .add(1, &[KeyValue::new("backend", backend)]);
}

pub fn record_flush_trigger(reason: &'static str) {
    instruments()
        .flush_triggers
        .add(1, &[KeyValue::new("reason", reason)]);
}

pub fn record_flush(backend: &'static str, duration_seconds: f64, items: u64, dropped: u64) {
    let i = instruments();
    let attrs = [KeyValue::new("backend", backend)];
    i.flush_duration_seconds.record(duration_seconds, &attrs);
    i.flush_items.record(items, &attrs);
    if dropped > 0 {
        i.items_dropped.add(dropped, &attrs);
    }
}

pub fn record_batch_failure(backend: &'static str) {
    instruments()
        .batch_failures
        .add(1, &[KeyValue::new("backend", backend)]);
}

pub fn record_backpressure_rejection(backend: &'static str) {
    instruments()
        .backpressure_rejections
        .add(1, &[KeyValue::new("backend", backend)]);
}
