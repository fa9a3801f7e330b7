//! Batched write pipeline
//!
//! Callers [`submit`](BatchPipeline::submit) backend write requests into an
//! open batch. The batch is swapped out and flushed when it reaches
//! `max_bulk_size` or when the flush timer fires, whichever comes first. At
//! most `concurrent_write_threads` flushes run at once, and at most as many
//! again wait for a slot. While that backlog is full, the timer leaves the
//! open batch alone and a submit that would fill it fails with
//! `Error::BufferFull`, so memory stays bounded when the backend stalls.
//!
//! A flush never retries. Items the backend rejects are logged and dropped;
//! a batch that fails as a whole is counted and dropped. Neither outcome
//! reaches the submitting caller.

mod buffer;
pub mod telemetry;

pub use buffer::WriteBuffer;

use crate::client::{BackendClient, Transport};
use crate::{Error, Result, StorageConfig};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Requests per batch before a size-triggered flush
    pub max_bulk_size: usize,
    /// Period of the flush timer
    pub flush_interval: Duration,
    /// Flushes allowed in flight at once
    pub concurrent_write_threads: usize,
    /// Bound on draining at shutdown
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

impl From<&StorageConfig> for PipelineConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_bulk_size: config.max_bulk_size,
            flush_interval: config.flush_interval,
            concurrent_write_threads: config.concurrent_write_threads,
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Accepting requests, nothing in flight
    Open,
    /// Accepting requests, at least one flush in flight
    Flushing,
    /// Shut down; submits fail with `PipelineClosed`
    Closed,
}

/// Cumulative pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub submitted: u64,
    pub batches_flushed: u64,
    pub items_written: u64,
    pub items_dropped: u64,
    pub batches_failed: u64,
    /// Submits refused with `BufferFull`
    pub submits_rejected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    batches_flushed: AtomicU64,
    items_written: AtomicU64,
    items_dropped: AtomicU64,
    batches_failed: AtomicU64,
    submits_rejected: AtomicU64,
}

struct OpenBatch<R> {
    buffer: WriteBuffer<R>,
    closed: bool,
}

struct Inner<T: Transport> {
    config: PipelineConfig,
    client: Arc<BackendClient<T>>,
    open: Mutex<OpenBatch<T::Request>>,
    permits: Semaphore,
    tracker: TaskTracker,
    handle: Handle,
    /// Batches swapped out but not finished, counted under the `open` lock
    in_flight: AtomicUsize,
    idle: Notify,
    counters: Counters,
    shutdown: CancellationToken,
}

/// Size- and time-triggered batching in front of a [`BackendClient`].
pub struct BatchPipeline<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for BatchPipeline<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> BatchPipeline<T> {
    /// Creates the pipeline and starts its flush timer on the current runtime.
    pub fn new(client: Arc<BackendClient<T>>, config: PipelineConfig) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::Internal(format!("pipeline needs a tokio runtime: {}", e)))?;
        let inner = Arc::new(Inner {
            open: Mutex::new(OpenBatch {
                buffer: WriteBuffer::new(config.max_bulk_size),
                closed: false,
            }),
            permits: Semaphore::new(config.concurrent_write_threads.max(1)),
            tracker: TaskTracker::new(),
            handle,
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            counters: Counters::default(),
            shutdown: CancellationToken::new(),
            client,
            config,
        });

        inner.tracker.spawn_on(
            run_flush_timer(
                Arc::downgrade(&inner),
                inner.shutdown.clone(),
                inner.config.flush_interval,
            ),
            &inner.handle,
        );

        info!(
            backend = inner.client.backend(),
            max_bulk_size = inner.config.max_bulk_size,
            flush_interval_ms = inner.config.flush_interval.as_millis() as u64,
            concurrent_write_threads = inner.config.concurrent_write_threads,
            "Batch pipeline started"
        );
        Ok(Self { inner })
    }

    pub fn client(&self) -> &Arc<BackendClient<T>> {
        &self.inner.client
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Appends a request to the open batch without waiting on I/O.
    ///
    /// Filling the batch swaps it out and dispatches it. Fails with
    /// `BufferFull` instead when the request would fill the batch while the
    /// backlog is at its limit.
    pub fn submit(&self, request: T::Request) -> Result<()> {
        let full = {
            let mut open = self.inner.open.lock();
            if open.closed {
                return Err(Error::PipelineClosed);
            }
            let fills = open.buffer.len() + 1 >= open.buffer.capacity();
            if fills && self.inner.backlog_full() {
                drop(open);
                let backend = self.inner.client.backend();
                self.inner.counters.submits_rejected.fetch_add(1, Ordering::Relaxed);
                counter!("telestore_pipeline_backpressure_rejections_total", "backend" => backend)
                    .increment(1);
                telemetry::record_backpressure_rejection(backend);
                debug!(backend, "Flush backlog full, refusing submit");
                return Err(Error::BufferFull);
            }
            if open.buffer.push(request) {
                self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
                Some(open.buffer.take())
            } else {
                None
            }
        };
        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        telemetry::record_submit(self.inner.client.backend());

        if let Some(batch) = full {
            telemetry::record_flush_trigger("size");
            self.inner.spawn_flush(batch);
        }
        Ok(())
    }

    /// Flushes the open batch and waits until no flush is in flight.
    ///
    /// The open batch is dispatched even when the backlog is full.
    pub async fn flush(&self) -> Result<()> {
        if let Some(batch) = self.inner.swap_open(false) {
            telemetry::record_flush_trigger("manual");
            self.inner.spawn_flush(batch);
        }
        self.inner.wait_idle().await;
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        if self.inner.open.lock().closed {
            PipelineState::Closed
        } else if self.inner.in_flight.load(Ordering::Acquire) > 0 {
            PipelineState::Flushing
        } else {
            PipelineState::Open
        }
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.inner.counters;
        PipelineStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            batches_flushed: c.batches_flushed.load(Ordering::Relaxed),
            items_written: c.items_written.load(Ordering::Relaxed),
            items_dropped: c.items_dropped.load(Ordering::Relaxed),
            batches_failed: c.batches_failed.load(Ordering::Relaxed),
            submits_rejected: c.submits_rejected.load(Ordering::Relaxed),
        }
    }

    /// Closes the pipeline, drains the open batch and waits for in-flight
    /// flushes, bounded by `shutdown_timeout`.
    pub async fn shutdown(&self) -> Result<()> {
        let remaining = {
            let mut open = self.inner.open.lock();
            open.closed = true;
            if open.buffer.is_empty() {
                None
            } else {
                self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
                Some(open.buffer.take())
            }
        };
        if let Some(batch) = remaining {
            telemetry::record_flush_trigger("shutdown");
            self.inner.spawn_flush(batch);
        }
        self.inner.shutdown.cancel();

        let inner = &self.inner;
        let drained = tokio::time::timeout(inner.config.shutdown_timeout, async {
            inner.wait_idle().await;
            inner.tracker.close();
            inner.tracker.wait().await;
        })
        .await;

        match drained {
            Ok(()) => {
                info!(backend = inner.client.backend(), stats = ?self.stats(), "Batch pipeline drained");
                Ok(())
            }
            Err(_) => {
                warn!(
                    backend = inner.client.backend(),
                    in_flight = inner.in_flight.load(Ordering::Acquire),
                    "Batch pipeline shutdown timed out with flushes in flight"
                );
                Err(Error::Timeout)
            }
        }
    }
}

impl<T: Transport> Inner<T> {
    /// Batches allowed in flight: one running and one waiting per write slot.
    fn backlog_limit(&self) -> usize {
        self.config.concurrent_write_threads.max(1) * 2
    }

    fn backlog_full(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) >= self.backlog_limit()
    }

    /// Swaps a non-empty open batch out, counting it in flight. With
    /// `bounded`, nothing is swapped while the backlog is full.
    fn swap_open(&self, bounded: bool) -> Option<Vec<T::Request>> {
        let mut open = self.open.lock();
        if open.buffer.is_empty() || (bounded && self.backlog_full()) {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Some(open.buffer.take())
    }

    fn spawn_flush(self: &Arc<Self>, batch: Vec<T::Request>) {
        let inner = Arc::clone(self);
        self.tracker.spawn_on(
            async move {
                inner.flush_batch(batch).await;
                inner.finish_one();
            },
            &self.handle,
        );
    }

    async fn flush_batch(&self, batch: Vec<T::Request>) {
        // The semaphore is never closed.
        let Ok(_permit) = self.permits.acquire().await else {
            return;
        };
        let backend = self.client.backend();
        let size = batch.len();
        let started = Instant::now();

        match self.client.execute(batch).await {
            Ok(result) => {
                for item in &result.rejected {
                    warn!(
                        backend,
                        table = %item.table,
                        id = %item.id,
                        reason = %item.reason,
                        "Backend rejected write, dropping it"
                    );
                }
                let dropped = result.rejected.len() as u64;
                self.counters.batches_flushed.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .items_written
                    .fetch_add(result.succeeded as u64, Ordering::Relaxed);
                self.counters.items_dropped.fetch_add(dropped, Ordering::Relaxed);
                if dropped > 0 {
                    counter!("telestore_pipeline_items_dropped_total", "backend" => backend)
                        .increment(dropped);
                }
                telemetry::record_flush(
                    backend,
                    started.elapsed().as_secs_f64(),
                    size as u64,
                    dropped,
                );
                debug!(backend, size, written = result.succeeded, dropped, "Flushed batch");
            }
            Err(e) => {
                self.counters.batches_failed.fetch_add(1, Ordering::Relaxed);
                counter!("telestore_pipeline_batch_failures_total", "backend" => backend)
                    .increment(1);
                telemetry::record_batch_failure(backend);
                error!(backend, size, error = %e, "Batch write failed, dropping batch");
            }
        }
    }

    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_flush_timer<T: Transport>(
    inner: Weak<Inner<T>>,
    shutdown: CancellationToken,
    period: Duration,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if let Some(batch) = inner.swap_open(true) {
                    telemetry::record_flush_trigger("timer");
                    inner.spawn_flush(batch);
                }
            }
            _ = shutdown.cancelled() => {
                debug!("Flush timer stopped");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BatchResult, ClientConfig};
    use async_trait::async_trait;

    #[derive(Default)]
    struct CountingTransport {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        type Request = u32;
        type Row = u32;

        fn name(&self) -> &'static str {
            "counting"
        }

        async fn open(&self) -> Result<()> {
            Ok(())
        }

        async fn bulk(&self, batch: Vec<u32>) -> Result<BatchResult> {
            self.batches.lock().push(batch.len());
            Ok(BatchResult::all_succeeded(batch.len()))
        }

        async fn get_by_ids(&self, _table: &str, _ids: &[String]) -> Result<Vec<u32>> {
            Ok(Vec::new())
        }
    }

    async fn pipeline(max_bulk_size: usize) -> BatchPipeline<CountingTransport> {
        let client = Arc::new(BackendClient::new(
            CountingTransport::default(),
            ClientConfig::default(),
        ));
        client.connect().await.unwrap();
        BatchPipeline::new(
            client,
            PipelineConfig {
                max_bulk_size,
                flush_interval: Duration::from_secs(60),
                concurrent_write_threads: 2,
                shutdown_timeout: Duration::from_secs(5),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn flush_drains_the_open_batch() {
        let p = pipeline(10).await;
        p.submit(1).unwrap();
        p.submit(2).unwrap();
        assert_eq!(p.state(), PipelineState::Open);

        p.flush().await.unwrap();
        assert_eq!(*p.client().transport().batches.lock(), vec![2]);
        assert_eq!(p.stats().items_written, 2);
    }

    #[tokio::test]
    async fn flush_without_data_is_a_no_op() {
        let p = pipeline(10).await;
        p.flush().await.unwrap();
        assert!(p.client().transport().batches.lock().is_empty());
        assert_eq!(p.stats(), PipelineStats::default());
    }

    #[tokio::test]
    async fn closed_pipeline_refuses_submits() {
        let p = pipeline(10).await;
        p.shutdown().await.unwrap();
        assert_eq!(p.state(), PipelineState::Closed);
        assert!(matches!(p.submit(1), Err(Error::PipelineClosed)));
    }

    #[test]
    fn new_outside_a_runtime_fails() {
        let client = Arc::new(BackendClient::new(
            CountingTransport::default(),
            ClientConfig::default(),
        ));
        assert!(matches!(
            BatchPipeline::new(client, PipelineConfig::default()),
            Err(Error::Internal(_))
        ));
    }
}
