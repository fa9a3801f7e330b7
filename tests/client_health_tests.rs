//! Tests for backend client health tracking and reconnect
//!
//! These tests verify that:
//! - Startup fails fast when the backend is unreachable
//! - Connection-level failures flip the client unhealthy
//! - Unhealthy clients reject calls without touching the transport
//! - The reconnect loop restores health on its fixed interval
//! - Health transitions reach the registered checker

use telestore::client::{BackendClient, BatchResult, ClientConfig, Transport};
use telestore::health::{GaugeMetricsCreator, HealthChecker, MetricsCreator};
use telestore::{Error, Result};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Transport whose link can be cut and restored.
#[derive(Default)]
struct FlakyTransport {
    down: AtomicBool,
    /// open() hangs instead of failing while set
    hang: AtomicBool,
    opens: AtomicUsize,
    bulks: AtomicUsize,
}

impl FlakyTransport {
    fn down() -> Self {
        let t = Self::default();
        t.down.store(true, Ordering::SeqCst);
        t
    }

    fn link_error(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(Error::Connection("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    type Request = u32;
    type Row = u32;

    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn open(&self) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.link_error()
    }

    async fn bulk(&self, batch: Vec<u32>) -> Result<BatchResult> {
        self.bulks.fetch_add(1, Ordering::SeqCst);
        self.link_error()?;
        Ok(BatchResult::all_succeeded(batch.len()))
    }

    async fn get_by_ids(&self, _table: &str, ids: &[String]) -> Result<Vec<u32>> {
        self.link_error()?;
        Ok(ids.iter().filter_map(|id| id.parse().ok()).collect())
    }
}

fn client(transport: FlakyTransport, reconnect_interval: Duration) -> Arc<BackendClient<FlakyTransport>> {
    Arc::new(BackendClient::new(
        transport,
        ClientConfig {
            request_timeout: Duration::from_millis(200),
            reconnect_interval,
        },
    ))
}

#[tokio::test]
async fn test_connect_fails_fast_when_backend_unreachable() {
    let c = client(FlakyTransport::down(), Duration::from_secs(60));
    let err = c.connect().await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "got {err:?}");
    assert!(!c.is_healthy());
}

#[tokio::test]
async fn test_connect_timeout_is_reported_as_connection_error() {
    let transport = FlakyTransport::default();
    transport.hang.store(true, Ordering::SeqCst);
    let c = client(transport, Duration::from_secs(60));

    let err = c.connect().await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "got {err:?}");
}

#[tokio::test]
async fn test_unhealthy_client_rejects_calls_without_io() {
    let c = client(FlakyTransport::default(), Duration::from_secs(60));
    c.connect().await.unwrap();

    c.transport().down.store(true, Ordering::SeqCst);
    assert!(matches!(c.execute(vec![1]).await, Err(Error::Connection(_))));
    assert!(!c.is_healthy());

    let bulks = c.transport().bulks.load(Ordering::SeqCst);
    assert!(matches!(c.execute(vec![2]).await, Err(Error::Unhealthy(_))));
    assert!(matches!(
        c.get_by_ids("numbers", &["1".to_string()]).await,
        Err(Error::Unhealthy(_))
    ));
    assert_eq!(c.transport().bulks.load(Ordering::SeqCst), bulks);
}

#[tokio::test]
async fn test_never_connected_client_is_unhealthy() {
    let c = client(FlakyTransport::default(), Duration::from_secs(60));
    assert!(!c.is_healthy());
    assert!(matches!(c.execute(vec![1]).await, Err(Error::Unhealthy(_))));
    assert_eq!(c.transport().bulks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_try_reconnect_restores_health() {
    let c = client(FlakyTransport::down(), Duration::from_secs(60));
    assert!(c.connect().await.is_err());
    assert!(!c.try_reconnect().await);

    c.transport().down.store(false, Ordering::SeqCst);
    assert!(c.try_reconnect().await);
    assert!(c.is_healthy());
    assert_eq!(c.execute(vec![1, 2]).await.unwrap().succeeded, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconnect_loop_recovers_on_interval() {
    let c = client(FlakyTransport::down(), Duration::from_millis(100));
    assert!(c.connect().await.is_err());
    let handle = c.spawn_reconnect_loop();

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!c.is_healthy());
    assert!(c.transport().opens.load(Ordering::SeqCst) >= 2);

    c.transport().down.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(c.is_healthy());

    c.close().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("reconnect loop exits on close")
        .unwrap();
}

#[tokio::test]
async fn test_payload_errors_keep_client_healthy() {
    struct Picky;

    #[async_trait]
    impl Transport for Picky {
        type Request = u32;
        type Row = u32;

        fn name(&self) -> &'static str {
            "picky"
        }

        async fn open(&self) -> Result<()> {
            Ok(())
        }

        async fn bulk(&self, _batch: Vec<u32>) -> Result<BatchResult> {
            Err(Error::WholeBatchFailure("HTTP 400".into()))
        }

        async fn get_by_ids(&self, _table: &str, _ids: &[String]) -> Result<Vec<u32>> {
            Ok(Vec::new())
        }
    }

    let c = BackendClient::new(Picky, ClientConfig::default());
    c.connect().await.unwrap();
    assert!(matches!(c.execute(vec![1]).await, Err(Error::WholeBatchFailure(_))));
    assert!(c.is_healthy());
}

#[tokio::test]
async fn test_checker_follows_health_transitions() {
    let c = client(FlakyTransport::default(), Duration::from_secs(60));
    let metric = GaugeMetricsCreator.create_health_check_metric("storage_flaky");
    c.register_checker(metric.clone());
    assert_eq!(metric.value(), 1, "unhealthy until connected");

    c.connect().await.unwrap();
    assert_eq!(metric.value(), 0);

    c.transport().down.store(true, Ordering::SeqCst);
    let _ = c.execute(vec![1]).await;
    assert_eq!(metric.value(), 1);

    c.transport().down.store(false, Ordering::SeqCst);
    assert!(c.try_reconnect().await);
    assert_eq!(metric.value(), 0);
}

#[tokio::test]
async fn test_checker_registered_after_connect_sees_healthy() {
    let c = client(FlakyTransport::default(), Duration::from_secs(60));
    c.connect().await.unwrap();
    let metric = GaugeMetricsCreator.create_health_check_metric("storage_late");
    c.register_checker(metric.clone());
    assert_eq!(metric.value(), 0);
    metric.unhealth(&Error::Timeout);
    assert_eq!(metric.value(), 1);
}
