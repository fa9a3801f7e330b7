//! Tests for the ingestion boundary
//!
//! Sources enter through [`SourceReceiver`]; management messages through
//! [`ServiceManagementHandler`]. Everything ends up in an embedded measure
//! engine and is read back through the DAO.

use telestore::backend::EmbeddedMeasureTransport;
use telestore::client::{BackendClient, ClientConfig};
use telestore::converter::MeasureConverter;
use telestore::dao::{BatchDao, GenericStorageDao, StorageDao};
use telestore::ingest::id::service_id;
use telestore::ingest::{
    LatencySample, NamingControl, ProfileThreadSnapshot, ServiceManagementHandler, Source,
    SourceReceiver,
};
use telestore::model::StorageEntity;
use telestore::pipeline::{BatchPipeline, PipelineConfig};
use telestore::records::{
    all_descriptors, query_thread_snapshots, InstanceTraffic, Layer, ServiceLatencyMetrics,
    ServiceTraffic,
};
use telestore::schema::SchemaRegistry;
use telestore::{BackendKind, Error};

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const NOW_MILLIS: i64 = 1_709_622_489_123;

type MeasureDao = GenericStorageDao<MeasureConverter, EmbeddedMeasureTransport>;

async fn setup() -> (Arc<MeasureDao>, Arc<SourceReceiver>) {
    let registry = Arc::new(SchemaRegistry::new(BackendKind::Measure));
    for descriptor in all_descriptors() {
        registry.register(descriptor).unwrap();
    }
    registry.publish();

    let client = Arc::new(BackendClient::new(
        EmbeddedMeasureTransport::default(),
        ClientConfig::default(),
    ));
    client.connect().await.unwrap();
    let pipeline = BatchPipeline::new(
        client,
        PipelineConfig {
            max_bulk_size: 100,
            flush_interval: Duration::from_secs(60),
            concurrent_write_threads: 2,
            shutdown_timeout: Duration::from_secs(5),
        },
    )
    .unwrap();
    let dao = Arc::new(GenericStorageDao::new(
        registry,
        MeasureConverter::new("sw"),
        pipeline,
        5000,
    ));
    let receiver = Arc::new(SourceReceiver::new(dao.clone()));
    (dao, receiver)
}

async fn stored_instance(dao: &MeasureDao) -> InstanceTraffic {
    let result = dao
        .query_by_ids("instance_traffic", &["c3Zj.1_inst-1".to_string()])
        .await
        .unwrap();
    assert_eq!(result.records.len(), 1);
    InstanceTraffic::from_record(&result.records[0]).unwrap()
}

fn registration() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "service": "svc",
        "serviceInstance": "inst-1",
        "properties": [
            {"key": "os_name", "value": "linux"},
            {"key": "ipv4", "value": "10.0.0.1"},
            {"key": "ipv4", "value": "10.0.0.2"}
        ]
    }))
    .unwrap()
}

fn ping() -> Vec<u8> {
    serde_json::to_vec(&json!({"service": "svc", "serviceInstance": "inst-1"})).unwrap()
}

async fn drain(receiver: &SourceReceiver, dao: &MeasureDao) {
    receiver.flush_metrics().await.unwrap();
    dao.flush().await.unwrap();
}

// =========================================================================
// Management messages
// =========================================================================

#[tokio::test]
async fn test_registration_and_heartbeat_fold_into_one_instance() {
    let (dao, receiver) = setup().await;
    let handler = ServiceManagementHandler::new(receiver.clone(), NamingControl::default());

    handler
        .handle_at("register-inst-1", &registration(), NOW_MILLIS)
        .unwrap();
    handler.handle_at("inst-1", &ping(), NOW_MILLIS + 60_000).unwrap();
    assert_eq!(receiver.pending_len(), 2, "one instance, one service");

    drain(&receiver, &dao).await;
    assert_eq!(receiver.pending_len(), 0);

    let instance = stored_instance(&dao).await;
    assert_eq!(instance.service_id, "c3Zj.1");
    assert_eq!(instance.layer, Layer::General);
    assert_eq!(instance.last_ping, 202403050709);
    assert_eq!(instance.time_bucket, 202403050708, "first bucket seen is kept");
    let properties = instance.properties.expect("registered properties");
    assert_eq!(properties.get("os_name"), Some("linux"));
    assert_eq!(properties.get("ipv4s"), Some("10.0.0.1,10.0.0.2"));
    assert_eq!(properties.get("ipv4"), None);

    let services = dao
        .query_by_ids("service_traffic", &["c3Zj.1".to_string()])
        .await
        .unwrap();
    let service = ServiceTraffic::from_record(&services.records[0]).unwrap();
    assert_eq!(service.name, "svc");
}

#[tokio::test]
async fn test_later_heartbeat_keeps_stored_properties() {
    let (dao, receiver) = setup().await;
    let handler = ServiceManagementHandler::new(receiver.clone(), NamingControl::default());

    handler
        .handle_at("register-inst-1", &registration(), NOW_MILLIS)
        .unwrap();
    drain(&receiver, &dao).await;

    handler.handle_at("inst-1", &ping(), NOW_MILLIS + 120_000).unwrap();
    drain(&receiver, &dao).await;

    let instance = stored_instance(&dao).await;
    assert_eq!(instance.last_ping, 202403050710);
    assert_eq!(
        instance.properties.as_ref().and_then(|p| p.get("os_name")),
        Some("linux")
    );
}

#[tokio::test]
async fn test_malformed_message_is_rejected() {
    let (_dao, receiver) = setup().await;
    let handler = ServiceManagementHandler::new(receiver.clone(), NamingControl::default());

    assert!(matches!(
        handler.handle("inst-1", b"{not json"),
        Err(Error::Serialization(_))
    ));
    assert!(matches!(
        handler.handle("register-inst-1", br#"{"service": "svc"}"#),
        Err(Error::Serialization(_))
    ));
    assert_eq!(receiver.pending_len(), 0);
}

#[tokio::test]
async fn test_long_service_names_are_truncated_before_id() {
    let (dao, receiver) = setup().await;
    let handler = ServiceManagementHandler::new(receiver.clone(), NamingControl::new(3, 70, 150));

    let payload = serde_json::to_vec(&json!({"service": "svc-with-a-long-name", "serviceInstance": "inst-1"})).unwrap();
    handler.handle_at("inst-1", &payload, NOW_MILLIS).unwrap();
    drain(&receiver, &dao).await;

    // "svc" after truncation
    assert_eq!(stored_instance(&dao).await.service_id, service_id("svc", true));
}

// =========================================================================
// Sources
// =========================================================================

#[tokio::test]
async fn test_metric_sources_merge_while_pending() {
    let (dao, receiver) = setup().await;
    for (latency_ms, offset) in [(100, 0), (300, 10_000), (50, 20_000)] {
        receiver
            .receive(Source::Latency(LatencySample {
                service_name: "svc".into(),
                latency_ms,
                throughput: 4.0,
                time_millis: NOW_MILLIS + offset,
            }))
            .unwrap();
    }
    assert_eq!(receiver.pending_len(), 1);
    drain(&receiver, &dao).await;

    let result = dao
        .query_by_ids("service_latency", &["202403050708_c3Zj.1".to_string()])
        .await
        .unwrap();
    let stored = ServiceLatencyMetrics::from_record(&result.records[0]).unwrap();
    assert_eq!(stored.count, 3);
    assert_eq!(stored.summation, 450);
    assert_eq!(stored.value, 150);
    assert_eq!(stored.max_latency, 300);
    assert_eq!(stored.histogram.get("0"), None);
    assert_eq!(stored.histogram.get("50"), Some(1));
}

#[tokio::test]
async fn test_append_only_sources_skip_the_pending_cache() {
    let (dao, receiver) = setup().await;
    for sequence in 0..3 {
        receiver
            .receive(Source::ProfileThreadSnapshot(ProfileThreadSnapshot {
                task_id: "task-1".into(),
                segment_id: "seg-1".into(),
                dump_time: NOW_MILLIS + sequence as i64,
                sequence,
                stack_binary: vec![sequence as u8],
            }))
            .unwrap();
    }
    assert_eq!(receiver.pending_len(), 0);
    assert_eq!(dao.stats().submitted, 3);

    dao.flush().await.unwrap();
    let snapshots = query_thread_snapshots(dao.as_ref(), "task-1", "seg-1", 0, 3, 10)
        .await
        .unwrap();
    assert_eq!(snapshots.len(), 3);
    assert_eq!(snapshots[2].time_bucket, 20240305070809);
}

#[tokio::test]
async fn test_metrics_timer_flushes_on_shutdown() {
    let (dao, receiver) = setup().await;
    receiver
        .receive(Source::Latency(LatencySample {
            service_name: "svc".into(),
            latency_ms: 20,
            throughput: 1.0,
            time_millis: NOW_MILLIS,
        }))
        .unwrap();

    let shutdown = CancellationToken::new();
    let timer = tokio::spawn(
        receiver
            .clone()
            .run_metrics_timer(Duration::from_secs(60), shutdown.clone()),
    );
    shutdown.cancel();
    timer.await.unwrap();

    assert_eq!(receiver.pending_len(), 0);
    assert_eq!(dao.stats().submitted, 1);
}
