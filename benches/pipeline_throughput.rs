//! Conversion, merge and pipeline throughput benchmark

use telestore::backend::EmbeddedMeasureTransport;
use telestore::client::{BackendClient, ClientConfig};
use telestore::converter::{
    ColumnarConverter, DocumentConverter, MeasureConverter, MeasurePoint, StorageConverter,
};
use telestore::model::{Record, StorageEntity};
use telestore::pipeline::{BatchPipeline, PipelineConfig};
use telestore::records::{SegmentRecord, ServiceLatencyMetrics};
use telestore::schema::SchemaRegistry;
use telestore::BackendKind;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

const BASE_MILLIS: i64 = 1_709_622_489_123;

fn create_segments(rows: usize) -> Vec<Record> {
    (0..rows)
        .map(|i| {
            SegmentRecord {
                segment_id: format!("seg-{i}"),
                trace_id: format!("trace-{}", i / 4),
                service_id: match i % 3 {
                    0 => "YXBpLWdhdGV3YXk=.1".to_string(),
                    1 => "b3JkZXItc2VydmljZQ==.1".to_string(),
                    _ => "cGF5bWVudC1zZXJ2aWNl.1".to_string(),
                },
                service_instance_id: format!("inst-{}", i % 10),
                endpoint_id: "L2FwaS92MS9vcmRlcnM=".to_string(),
                start_time: BASE_MILLIS + i as i64,
                latency: (i % 500) as i32,
                is_error: i % 50 == 0,
                tags: vec![
                    "http.method=GET".to_string(),
                    format!("status_code={}", if i % 50 == 0 { 500 } else { 200 }),
                ],
                data_binary: vec![0u8; 256],
                time_bucket: 20240305070809,
            }
            .to_record()
            .unwrap()
        })
        .collect()
}

fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_segment");
    let rows = 1_000;
    let records = create_segments(rows);
    group.throughput(Throughput::Elements(rows as u64));

    let measure_schema = SchemaRegistry::new(BackendKind::Measure)
        .register(SegmentRecord::descriptor())
        .unwrap();
    let measure = MeasureConverter::new("sw");
    group.bench_function("measure", |b| {
        b.iter(|| {
            for record in &records {
                black_box(measure.entity_to_storage(record, &measure_schema).unwrap());
            }
        });
    });

    let document_schema = SchemaRegistry::new(BackendKind::Elasticsearch)
        .register(SegmentRecord::descriptor())
        .unwrap();
    let document = DocumentConverter::new("sw");
    group.bench_function("document", |b| {
        b.iter(|| {
            for record in &records {
                black_box(document.entity_to_storage(record, &document_schema).unwrap());
            }
        });
    });

    let columnar_schema = SchemaRegistry::new(BackendKind::Columnar)
        .register(SegmentRecord::descriptor())
        .unwrap();
    let columnar = ColumnarConverter::new();
    group.bench_function("columnar", |b| {
        b.iter(|| {
            for record in &records {
                black_box(columnar.entity_to_storage(record, &columnar_schema).unwrap());
            }
        });
    });

    group.finish();
}

fn benchmark_metric_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("metric_merge");
    let descriptor = ServiceLatencyMetrics::descriptor();

    for samples in [100, 1_000] {
        group.throughput(Throughput::Elements(samples as u64));
        let records: Vec<Record> = (0..samples)
            .map(|i| {
                ServiceLatencyMetrics::from_sample("c3Zj.1", (i * 7 % 2500) as i64, i as f64, 202403050708)
                    .to_record()
                    .unwrap()
            })
            .collect();

        group.bench_function(format!("{}_samples", samples), |b| {
            b.iter(|| {
                let mut merged = records[0].clone();
                for record in &records[1..] {
                    merged.merge(record, descriptor).unwrap();
                }
                black_box(merged)
            });
        });
    }

    group.finish();
}

fn benchmark_pipeline_submit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("pipeline_submit");

    for (rows, max_bulk_size) in [(10_000, 500), (10_000, 5_000)] {
        group.throughput(Throughput::Elements(rows as u64));

        let schema = SchemaRegistry::new(BackendKind::Measure)
            .register(SegmentRecord::descriptor())
            .unwrap();
        let converter = MeasureConverter::new("sw");
        let points: Vec<MeasurePoint> = create_segments(rows)
            .iter()
            .map(|r| converter.entity_to_storage(r, &schema).unwrap())
            .collect();

        let pipeline = rt.block_on(async {
            let client = Arc::new(BackendClient::new(
                EmbeddedMeasureTransport::default(),
                ClientConfig::default(),
            ));
            client.connect().await.unwrap();
            BatchPipeline::new(
                client,
                PipelineConfig {
                    max_bulk_size,
                    flush_interval: Duration::from_secs(60),
                    // room for every batch of a run so submit never hits backpressure
                    concurrent_write_threads: 16,
                    shutdown_timeout: Duration::from_secs(30),
                },
            )
            .unwrap()
        });

        group.bench_function(format!("{}_rows_bulk_{}", rows, max_bulk_size), |b| {
            b.to_async(&rt).iter(|| async {
                for point in points.iter().cloned() {
                    pipeline.submit(point).unwrap();
                }
                pipeline.flush().await.unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_encode,
    benchmark_metric_merge,
    benchmark_pipeline_submit,
);

criterion_main!(benches);
