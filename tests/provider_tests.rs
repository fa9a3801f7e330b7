//! Tests for the storage provider lifecycle
//!
//! prepare -> start -> shutdown over the module manager, for every backend
//! that can run in-process, plus the failure modes of a miswired startup.

use telestore::client::ClientControl;
use telestore::config::ConfigService;
use telestore::dao::{BatchDao, StorageDao};
use telestore::health::{GaugeMetricsCreator, MetricsCreator};
use telestore::model::StorageEntity;
use telestore::module::{ModuleManager, CORE, STORAGE, TELEMETRY};
use telestore::pipeline::PipelineState;
use telestore::provider::StorageProvider;
use telestore::records::{all_descriptors, ProfileThreadSnapshotRecord};
use telestore::schema::SchemaRegistry;
use telestore::{BackendKind, Error, StorageConfig};

use std::sync::Arc;
use std::time::Duration;

fn config(backend: BackendKind) -> StorageConfig {
    StorageConfig {
        backend,
        flush_interval: Duration::from_secs(60),
        request_timeout: Duration::from_secs(2),
        shutdown_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn manager(config: &StorageConfig) -> ModuleManager {
    let manager = ModuleManager::new();
    manager
        .register_module(CORE)
        .register_service(Arc::new(ConfigService::new(config.clone())));
    manager
        .register_module(TELEMETRY)
        .register_service::<dyn MetricsCreator>(Arc::new(GaugeMetricsCreator));
    manager
}

fn snapshot() -> ProfileThreadSnapshotRecord {
    ProfileThreadSnapshotRecord {
        task_id: "task-1".into(),
        segment_id: "seg-1".into(),
        dump_time: 1_709_622_489_123,
        sequence: 0,
        stack_binary: vec![1],
        time_bucket: 20240305070809,
    }
}

async fn exercise_backend(backend: BackendKind) {
    let config = config(backend);
    let manager = manager(&config);
    let provider = StorageProvider::new(config);
    assert_eq!(provider.backend(), backend);

    provider.prepare(&manager).unwrap();
    provider.start(&manager).await.unwrap();

    let storage = manager.find(STORAGE).unwrap();
    let registry = storage.get_service::<SchemaRegistry>().unwrap();
    assert!(registry.is_published());
    assert_eq!(registry.record_types().len(), all_descriptors().len());
    assert!(storage.get_service::<dyn ClientControl>().unwrap().is_healthy());

    let dao = storage.get_service::<dyn StorageDao>().unwrap();
    dao.persist_record(&snapshot().to_record().unwrap()).unwrap();
    let batch = storage.get_service::<dyn BatchDao>().unwrap();
    batch.flush().await.unwrap();

    let id = ProfileThreadSnapshotRecord::id_of("task-1", "seg-1", 0);
    let found = dao
        .query_by_ids("profile_task_segment_snapshot", &[id])
        .await
        .unwrap();
    assert_eq!(
        ProfileThreadSnapshotRecord::from_record(&found.records[0]).unwrap(),
        snapshot()
    );

    provider.shutdown().await.unwrap();
    assert_eq!(batch.state(), PipelineState::Closed);
}

#[tokio::test]
async fn test_measure_backend_lifecycle() {
    exercise_backend(BackendKind::Measure).await;
}

#[tokio::test]
async fn test_columnar_backend_lifecycle() {
    exercise_backend(BackendKind::Columnar).await;
}

#[tokio::test]
async fn test_unreachable_backend_fails_start() {
    let mut config = config(BackendKind::Elasticsearch);
    config.port = 1;
    let manager = manager(&config);
    let provider = StorageProvider::new(config);
    provider.prepare(&manager).unwrap();

    let err = provider.start(&manager).await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "got {err:?}");
    let client = manager
        .find(STORAGE)
        .unwrap()
        .get_service::<dyn ClientControl>()
        .unwrap();
    assert!(!client.is_healthy());
}

#[tokio::test]
async fn test_start_before_prepare_is_rejected() {
    let config = config(BackendKind::Measure);
    let manager = manager(&config);
    let provider = StorageProvider::new(config);
    assert!(matches!(provider.start(&manager).await, Err(Error::Module(_))));
    // nothing prepared, nothing to drain
    provider.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_without_telemetry_module_fails() {
    let config = config(BackendKind::Measure);
    let manager = ModuleManager::new();
    manager
        .register_module(CORE)
        .register_service(Arc::new(ConfigService::new(config.clone())));
    let provider = StorageProvider::new(config);
    provider.prepare(&manager).unwrap();

    assert!(matches!(provider.start(&manager).await, Err(Error::Module(_))));
}

#[tokio::test]
async fn test_prepare_rejects_invalid_config() {
    let mut config = config(BackendKind::Measure);
    config.max_bulk_size = 0;
    let manager = manager(&config);
    assert!(matches!(
        StorageProvider::new(config).prepare(&manager),
        Err(Error::Config(_))
    ));
    assert!(manager.find(STORAGE).is_err());
}
