//! Storage DAOs
//!
//! [`StorageDao`] persists records and reads them back by id; metrics go
//! through read-merge-write against the stored values. [`BatchDao`] is the
//! raw insert/flush surface of the write pipeline. One
//! [`GenericStorageDao`] serves both for any converter/transport pair.
//!
//! Each merged metric is kept in a session cache after it is queued, so a
//! second `persist_metrics` for the same id merges against that value even
//! before the first write is flushed. A session expires once the id has not
//! been written for the session timeout; the next write reads storage again.

use crate::client::Transport;
use crate::converter::StorageConverter;
use crate::model::{Record, RecordKind};
use crate::pipeline::{BatchPipeline, PipelineState, PipelineStats};
use crate::schema::{Schema, SchemaRegistry};
use crate::{Error, Result};
use async_trait::async_trait;
use metrics::counter;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// How long a merged metric stays cached after its last write.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(70);

/// Rows read back by id. Rows that fail to decode are reported next to the
/// good ones rather than failing the read.
#[derive(Debug, Default)]
pub struct QueryResult {
    pub records: Vec<Record>,
    pub errors: Vec<Error>,
}

#[async_trait]
pub trait StorageDao: Send + Sync {
    /// Queues an append-only record for the next flush.
    fn persist_record(&self, record: &Record) -> Result<()>;

    /// Merges metrics with each other and with their stored values, then
    /// queues the results. Returns how many records were queued.
    ///
    /// A metric that fails to merge or convert is logged and skipped. Errors
    /// that concern a whole record type are returned after every other type
    /// has been processed.
    async fn persist_metrics(&self, metrics: Vec<Record>) -> Result<usize>;

    async fn query_by_ids(&self, record_type: &str, ids: &[String]) -> Result<QueryResult>;
}

#[async_trait]
pub trait BatchDao: Send + Sync {
    /// Queues a record as-is, without merging.
    fn insert(&self, record: &Record) -> Result<()>;

    async fn flush(&self) -> Result<()>;

    fn state(&self) -> PipelineState;

    fn stats(&self) -> PipelineStats;

    async fn shutdown(&self) -> Result<()>;
}

/// DAO over a converter and the pipeline of its transport.
pub struct GenericStorageDao<C, T>
where
    C: StorageConverter,
    T: Transport<Request = C::Request, Row = C::Row>,
{
    registry: Arc<SchemaRegistry>,
    converter: C,
    pipeline: BatchPipeline<T>,
    query_max_size: usize,
    /// Last queued value per record type and id
    sessions: Mutex<HashMap<String, HashMap<String, Session>>>,
    session_timeout: Duration,
}

struct Session {
    record: Record,
    touched: Instant,
}

impl<C, T> GenericStorageDao<C, T>
where
    C: StorageConverter,
    T: Transport<Request = C::Request, Row = C::Row>,
{
    pub fn new(
        registry: Arc<SchemaRegistry>,
        converter: C,
        pipeline: BatchPipeline<T>,
        query_max_size: usize,
    ) -> Self {
        Self {
            registry,
            converter,
            pipeline,
            query_max_size: query_max_size.max(1),
            sessions: Mutex::new(HashMap::new()),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn pipeline(&self) -> &BatchPipeline<T> {
        &self.pipeline
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }

    fn submit(&self, record: &Record, schema: &Schema) -> Result<()> {
        let request = self.converter.entity_to_storage(record, schema)?;
        self.pipeline.submit(request)
    }

    /// Stored rows for `ids`, fetched in bounded chunks.
    async fn load(&self, schema: &Schema, ids: &[String]) -> Result<Vec<T::Row>> {
        let table = self.converter.table_name(schema);
        let mut rows = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.query_max_size) {
            rows.extend(self.pipeline.client().get_by_ids(&table, chunk).await?);
        }
        Ok(rows)
    }

    async fn persist_metrics_of_type(
        &self,
        record_type: &str,
        metrics: Vec<Record>,
        sessions: &mut HashMap<String, Session>,
    ) -> Result<usize> {
        let schema = self.registry.get_schema(record_type)?;
        if schema.kind() != RecordKind::Metric {
            return Err(Error::InvalidSchema(format!(
                "{} is append-only and cannot be merged",
                record_type
            )));
        }
        let descriptor = schema.descriptor();

        let mut merged: BTreeMap<String, Record> = BTreeMap::new();
        for metric in metrics {
            match merged.entry(metric.id.clone()) {
                Entry::Occupied(mut existing) => {
                    if let Err(e) = existing.get_mut().merge(&metric, descriptor) {
                        warn!(record_type, id = %metric.id, error = %e, "Dropping metric that does not merge");
                        record_dropped(record_type);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(metric);
                }
            }
        }

        let mut uncached = Vec::new();
        for (id, current) in merged.iter_mut() {
            match sessions.get(id) {
                Some(session) => {
                    if let Err(e) = current.merge(&session.record, descriptor) {
                        warn!(record_type, id = %id, error = %e, "Cached metric not mergeable, overwriting it");
                    }
                }
                None => uncached.push(id.clone()),
            }
        }

        for row in self.load(&schema, &uncached).await? {
            let stored = match self.converter.storage_to_entity(&row, &schema) {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(record_type, error = %e, "Stored metric unreadable, overwriting it");
                    continue;
                }
            };
            if let Some(current) = merged.get_mut(&stored.id) {
                if let Err(e) = current.merge(&stored, descriptor) {
                    warn!(record_type, id = %stored.id, error = %e, "Stored metric not mergeable, overwriting it");
                }
            }
        }

        let now = Instant::now();
        let mut queued = 0;
        for (id, record) in merged {
            match self.submit(&record, &schema) {
                Ok(()) => {
                    sessions.insert(id, Session { record, touched: now });
                    queued += 1;
                }
                Err(Error::PipelineClosed) => return Err(Error::PipelineClosed),
                Err(e) => {
                    warn!(record_type, id = %id, error = %e, "Dropping metric that cannot be queued");
                    record_dropped(record_type);
                }
            }
        }
        debug!(record_type, queued, "Queued merged metrics");
        Ok(queued)
    }
}

fn record_dropped(record_type: &str) {
    counter!("telestore_dao_metrics_dropped_total", "record_type" => record_type.to_string())
        .increment(1);
}

#[async_trait]
impl<C, T> StorageDao for GenericStorageDao<C, T>
where
    C: StorageConverter,
    T: Transport<Request = C::Request, Row = C::Row>,
{
    fn persist_record(&self, record: &Record) -> Result<()> {
        let schema = self.registry.get_schema(&record.type_name)?;
        if schema.kind() != RecordKind::AppendOnly {
            return Err(Error::InvalidSchema(format!(
                "{} is a metric and must go through persist_metrics",
                record.type_name
            )));
        }
        self.submit(record, &schema)
    }

    async fn persist_metrics(&self, metrics: Vec<Record>) -> Result<usize> {
        let mut by_type: BTreeMap<String, Vec<Record>> = BTreeMap::new();
        for metric in metrics {
            by_type.entry(metric.type_name.clone()).or_default().push(metric);
        }

        let mut sessions = self.sessions.lock().await;
        let now = Instant::now();
        for cached in sessions.values_mut() {
            cached.retain(|_, session| now.duration_since(session.touched) < self.session_timeout);
        }

        let mut queued = 0;
        let mut first_error = None;
        for (record_type, metrics) in by_type {
            let cached = sessions.entry(record_type.clone()).or_default();
            match self.persist_metrics_of_type(&record_type, metrics, cached).await {
                Ok(n) => queued += n,
                Err(e) => {
                    warn!(record_type = %record_type, error = %e, "Metrics of this type not persisted");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(queued),
        }
    }

    async fn query_by_ids(&self, record_type: &str, ids: &[String]) -> Result<QueryResult> {
        let schema = self.registry.get_schema(record_type)?;
        let mut result = QueryResult::default();
        for row in self.load(&schema, ids).await? {
            match self.converter.storage_to_entity(&row, &schema) {
                Ok(record) => result.records.push(record),
                Err(e) => {
                    warn!(record_type, error = %e, "Skipping undecodable row");
                    result.errors.push(e);
                }
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl<C, T> BatchDao for GenericStorageDao<C, T>
where
    C: StorageConverter,
    T: Transport<Request = C::Request, Row = C::Row>,
{
    fn insert(&self, record: &Record) -> Result<()> {
        let schema = self.registry.get_schema(&record.type_name)?;
        self.submit(record, &schema)
    }

    async fn flush(&self) -> Result<()> {
        self.pipeline.flush().await
    }

    fn state(&self) -> PipelineState {
        self.pipeline.state()
    }

    fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    async fn shutdown(&self) -> Result<()> {
        self.pipeline.shutdown().await
    }
}
