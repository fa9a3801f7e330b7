//! Ingestion boundary
//!
//! Fetchers hand domain [`Source`]s to [`SourceReceiver::receive`].
//! Append-only sources are queued for persistence immediately. Metric
//! sources are merged into a pending cache keyed by record id, which a
//! timer flushes through read-merge-write.

pub mod id;
mod management;
mod naming;

pub use management::{InstancePing, InstancePropertiesReport, KeyStringValuePair, ServiceManagementHandler};
pub use naming::NamingControl;

use crate::dao::StorageDao;
use crate::model::{Record, RecordDescriptor, StorageEntity};
use crate::records::{
    InstanceProperties, InstanceTraffic, Layer, ProfileThreadSnapshotRecord, SegmentRecord,
    ServiceLatencyMetrics, ServiceTraffic,
};
use crate::time_bucket::{time_bucket, DownSampling};
use crate::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Instance registration or heartbeat.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInstanceUpdate {
    pub service_id: String,
    pub name: String,
    pub layer: Layer,
    /// Present on registrations only
    pub properties: Option<InstanceProperties>,
    pub time_bucket: i64,
}

/// A service announced by one of its instances.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceMeta {
    pub name: String,
    pub layer: Layer,
    pub time_bucket: i64,
}

/// One thread dump of a profiled segment.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileThreadSnapshot {
    pub task_id: String,
    pub segment_id: String,
    pub dump_time: i64,
    pub sequence: i32,
    pub stack_binary: Vec<u8>,
}

/// Latency of one call to a service.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySample {
    pub service_name: String,
    pub latency_ms: i64,
    /// Calls per second observed alongside the call
    pub throughput: f64,
    pub time_millis: i64,
}

/// Domain events accepted by the receiver.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    ServiceInstanceUpdate(ServiceInstanceUpdate),
    ServiceMeta(ServiceMeta),
    ProfileThreadSnapshot(ProfileThreadSnapshot),
    Segment(SegmentRecord),
    Latency(LatencySample),
}

enum Dispatch {
    Append(Record),
    Metric(&'static RecordDescriptor, Record),
}

impl Source {
    fn dispatch(self) -> Result<Dispatch> {
        Ok(match self {
            Source::ServiceInstanceUpdate(update) => {
                let traffic = InstanceTraffic {
                    service_id: update.service_id,
                    name: update.name,
                    layer: update.layer,
                    last_ping: update.time_bucket,
                    properties: update.properties,
                    time_bucket: update.time_bucket,
                };
                Dispatch::Metric(InstanceTraffic::descriptor(), traffic.to_record()?)
            }
            Source::ServiceMeta(meta) => {
                let traffic = ServiceTraffic {
                    service_id: id::service_id(&meta.name, true),
                    name: meta.name,
                    layer: meta.layer,
                    time_bucket: meta.time_bucket,
                };
                Dispatch::Metric(ServiceTraffic::descriptor(), traffic.to_record()?)
            }
            Source::ProfileThreadSnapshot(snapshot) => {
                let record = ProfileThreadSnapshotRecord {
                    time_bucket: time_bucket(snapshot.dump_time, DownSampling::Second),
                    task_id: snapshot.task_id,
                    segment_id: snapshot.segment_id,
                    dump_time: snapshot.dump_time,
                    sequence: snapshot.sequence,
                    stack_binary: snapshot.stack_binary,
                };
                Dispatch::Append(record.to_record()?)
            }
            Source::Segment(segment) => Dispatch::Append(segment.to_record()?),
            Source::Latency(sample) => {
                let metrics = ServiceLatencyMetrics::from_sample(
                    &id::service_id(&sample.service_name, true),
                    sample.latency_ms,
                    sample.throughput,
                    time_bucket(sample.time_millis, DownSampling::Minute),
                );
                Dispatch::Metric(ServiceLatencyMetrics::descriptor(), metrics.to_record()?)
            }
        })
    }
}

/// Converts sources to records and routes them to storage.
pub struct SourceReceiver {
    dao: Arc<dyn StorageDao>,
    /// (record type, id) -> merged metric awaiting flush
    pending: DashMap<(String, String), Record>,
}

impl SourceReceiver {
    pub fn new(dao: Arc<dyn StorageDao>) -> Self {
        Self {
            dao,
            pending: DashMap::new(),
        }
    }

    pub fn receive(&self, source: Source) -> Result<()> {
        match source.dispatch()? {
            Dispatch::Append(record) => self.dao.persist_record(&record),
            Dispatch::Metric(descriptor, record) => {
                let key = (record.type_name.clone(), record.id.clone());
                match self.pending.entry(key) {
                    dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                        entry.get_mut().merge(&record, descriptor)
                    }
                    dashmap::mapref::entry::Entry::Vacant(entry) => {
                        entry.insert(record);
                        Ok(())
                    }
                }
            }
        }
    }

    /// Metrics waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Hands every pending metric to the DAO. Returns how many were queued.
    pub async fn flush_metrics(&self) -> Result<usize> {
        let keys: Vec<(String, String)> = self.pending.iter().map(|e| e.key().clone()).collect();
        let drained: Vec<Record> = keys
            .iter()
            .filter_map(|k| self.pending.remove(k).map(|(_, record)| record))
            .collect();
        if drained.is_empty() {
            return Ok(0);
        }
        let count = drained.len();
        match self.dao.persist_metrics(drained).await {
            Ok(queued) => {
                debug!(queued, "Flushed pending metrics");
                Ok(queued)
            }
            Err(e) => {
                error!(count, error = %e, "Persisting metrics failed for at least one record type");
                Err(e)
            }
        }
    }

    /// Flushes pending metrics every `period` until `shutdown`, then once more.
    pub async fn run_metrics_timer(self: Arc<Self>, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // failures are logged by flush_metrics
                    let _ = self.flush_metrics().await;
                }
                _ = shutdown.cancelled() => {
                    info!(pending = self.pending_len(), "Metrics timer shutting down, flushing remaining metrics");
                    let _ = self.flush_metrics().await;
                    break;
                }
            }
        }
    }
}
