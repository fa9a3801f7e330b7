//! Backend client facade
//!
//! [`BackendClient`] wraps a backend [`Transport`] with health tracking:
//! connection-level failures flip it unhealthy, later calls fail fast
//! without I/O, and a reconnect loop retries on a fixed interval with at
//! most one attempt in flight.

use crate::health::HealthChecker;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A write the backend refused; its siblings in the batch are unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedItem {
    pub table: String,
    pub id: String,
    pub reason: String,
}

impl From<RejectedItem> for Error {
    fn from(item: RejectedItem) -> Self {
        Error::PartialBatchFailure {
            table: item.table,
            id: item.id,
            reason: item.reason,
        }
    }
}

/// Per-item outcome of a bulk write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub succeeded: usize,
    pub rejected: Vec<RejectedItem>,
}

impl BatchResult {
    pub fn all_succeeded(count: usize) -> Self {
        Self {
            succeeded: count,
            rejected: Vec::new(),
        }
    }
}

/// Raw access to one storage engine.
///
/// Implementations map link failures to `Error::Connection` and report
/// per-item refusals in [`BatchResult::rejected`] rather than failing the
/// whole call.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Request: Send + 'static;
    type Row: Send + 'static;

    /// Short backend name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Handshake; also used by each reconnect attempt.
    async fn open(&self) -> Result<()>;

    async fn bulk(&self, batch: Vec<Self::Request>) -> Result<BatchResult>;

    async fn get_by_ids(&self, table: &str, ids: &[String]) -> Result<Vec<Self::Row>>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Client timing settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Duration,
    pub reconnect_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(5),
        }
    }
}

/// Health-tracked session over a [`Transport`].
pub struct BackendClient<T: Transport> {
    transport: T,
    config: ClientConfig,
    healthy: AtomicBool,
    reconnecting: tokio::sync::Mutex<()>,
    checker: RwLock<Option<Arc<dyn HealthChecker>>>,
    shutdown: CancellationToken,
}

impl<T: Transport> BackendClient<T> {
    /// Creates a client; it stays unhealthy until `connect` succeeds.
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            healthy: AtomicBool::new(false),
            reconnecting: tokio::sync::Mutex::new(()),
            checker: RwLock::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn backend(&self) -> &'static str {
        self.transport.name()
    }

    pub fn register_checker(&self, checker: Arc<dyn HealthChecker>) {
        if self.is_healthy() {
            checker.health();
        }
        *self.checker.write() = Some(checker);
    }

    /// Opens the session, failing fast with `Error::Connection`.
    pub async fn connect(&self) -> Result<()> {
        match self.bounded(self.transport.open()).await {
            Ok(()) => {
                self.mark_healthy();
                info!(backend = self.backend(), "Connected to storage backend");
                Ok(())
            }
            Err(e) => {
                self.mark_unhealthy(&e);
                Err(match e {
                    Error::Connection(_) => e,
                    other => Error::Connection(format!("{}: {}", self.backend(), other)),
                })
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Sends one bulk write.
    pub async fn execute(&self, batch: Vec<T::Request>) -> Result<BatchResult> {
        self.ensure_healthy()?;
        let result = self.bounded(self.transport.bulk(batch)).await;
        self.observe(&result);
        result
    }

    pub async fn get_by_ids(&self, table: &str, ids: &[String]) -> Result<Vec<T::Row>> {
        self.ensure_healthy()?;
        let result = self.bounded(self.transport.get_by_ids(table, ids)).await;
        self.observe(&result);
        result
    }

    /// One reconnect attempt. Returns false immediately when another
    /// attempt is already running.
    pub async fn try_reconnect(&self) -> bool {
        let Ok(_guard) = self.reconnecting.try_lock() else {
            debug!(backend = self.backend(), "Reconnect already in progress");
            return false;
        };
        if self.is_healthy() {
            return true;
        }
        match self.bounded(self.transport.open()).await {
            Ok(()) => {
                info!(backend = self.backend(), "Reconnected to storage backend");
                self.mark_healthy();
                true
            }
            Err(e) => {
                warn!(backend = self.backend(), error = %e, "Reconnect attempt failed");
                self.mark_unhealthy(&e);
                false
            }
        }
    }

    /// Spawns the fixed-interval reconnect loop; it exits on `close`.
    pub fn spawn_reconnect_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let period = client.config.reconnect_interval;
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if !client.is_healthy() {
                            client.try_reconnect().await;
                        }
                    }
                    _ = client.shutdown.cancelled() => {
                        debug!(backend = client.backend(), "Reconnect loop stopped");
                        break;
                    }
                }
            }
        })
    }

    pub async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        self.transport.close().await
    }

    fn ensure_healthy(&self) -> Result<()> {
        if self.is_healthy() {
            Ok(())
        } else {
            Err(Error::Unhealthy(self.backend().to_string()))
        }
    }

    async fn bounded<F, R>(&self, fut: F) -> Result<R>
    where
        F: Future<Output = Result<R>>,
    {
        match tokio::time::timeout(self.config.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        }
    }

    fn observe<R>(&self, result: &Result<R>) {
        if let Err(e) = result {
            if e.is_connection_level() {
                self.mark_unhealthy(e);
            }
        }
    }

    fn mark_healthy(&self) {
        self.healthy.store(true, Ordering::Release);
        if let Some(checker) = self.checker.read().as_ref() {
            checker.health();
        }
    }

    fn mark_unhealthy(&self, reason: &Error) {
        if self.healthy.swap(false, Ordering::AcqRel) {
            warn!(
                backend = self.backend(),
                error = %reason,
                "Storage backend unhealthy, calls fail fast until reconnect"
            );
        }
        if let Some(checker) = self.checker.read().as_ref() {
            checker.unhealth(reason);
        }
    }
}

/// Type-erased lifecycle control over a [`BackendClient`].
#[async_trait]
pub trait ClientControl: Send + Sync {
    fn backend(&self) -> &'static str;
    async fn connect(&self) -> Result<()>;
    fn is_healthy(&self) -> bool;
    fn register_checker(&self, checker: Arc<dyn HealthChecker>);
    fn start_reconnect_loop(self: Arc<Self>) -> JoinHandle<()>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
impl<T: Transport> ClientControl for BackendClient<T> {
    fn backend(&self) -> &'static str {
        BackendClient::backend(self)
    }

    async fn connect(&self) -> Result<()> {
        BackendClient::connect(self).await
    }

    fn is_healthy(&self) -> bool {
        BackendClient::is_healthy(self)
    }

    fn register_checker(&self, checker: Arc<dyn HealthChecker>) {
        BackendClient::register_checker(self, checker)
    }

    fn start_reconnect_loop(self: Arc<Self>) -> JoinHandle<()> {
        self.spawn_reconnect_loop()
    }

    async fn close(&self) -> Result<()> {
        BackendClient::close(self).await
    }
}
