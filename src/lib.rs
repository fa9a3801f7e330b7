//! # telestore
//!
//! Storage abstraction and persistence pipeline for an observability
//! backend.
//!
//! Telemetry arrives as domain sources (heartbeats, profiling snapshots,
//! trace segments, latency samples), becomes time-bucketed records and is
//! persisted through one of several interchangeable storage engines with
//! identical semantics.
//!
//! ## Architecture
//!
//! - **Model**: record descriptors, generic records, merge policies
//! - **Schema**: per-backend column mapping, published once at startup
//! - **Converter**: record <-> backend-native write request / row
//! - **Pipeline**: size- and time-triggered batching with bounded concurrent flushes
//! - **Client**: backend session with health tracking and fixed-backoff reconnect
//! - **Provider**: wires the above into services behind the module boundary

pub mod api;
pub mod backend;
pub mod client;
pub mod config;
pub mod converter;
pub mod dao;
pub mod health;
pub mod ingest;
pub mod model;
pub mod module;
pub mod pipeline;
pub mod provider;
pub mod records;
pub mod schema;
pub mod telemetry;
pub mod time_bucket;

mod error;

pub use error::{Error, Result};

use std::time::Duration;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Which storage engine backs the deployment
    pub backend: BackendKind,
    /// Backend host; unused by the embedded measure engine
    pub host: String,
    /// Backend port; unused by the embedded measure engine
    pub port: u16,
    /// Group (measure), index prefix (elasticsearch) or object prefix (columnar)
    pub namespace: String,
    /// Requests per bulk write
    pub max_bulk_size: usize,
    /// Longest time a request waits in an open batch
    pub flush_interval: Duration,
    /// Bulk writes allowed in flight at once
    pub concurrent_write_threads: usize,
    /// Cap on profile task log rows fetched per query
    pub fetch_task_log_max_size: usize,
    /// Cap on ids per metadata/read-by-id query
    pub metadata_query_max_size: usize,
    /// Bound on each backend call
    pub request_timeout: Duration,
    /// Fixed backoff between reconnect attempts
    pub reconnect_interval: Duration,
    /// Bound on draining the pipeline at shutdown
    pub shutdown_timeout: Duration,
    /// Object store settings for the columnar backend
    pub object_store: ObjectStoreConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Measure,
            host: "127.0.0.1".to_string(),
            port: 17912,
            namespace: "sw".to_string(),
            max_bulk_size: 5000,
            flush_interval: Duration::from_secs(15),
            concurrent_write_threads: 15,
            fetch_task_log_max_size: 1000,
            metadata_query_max_size: 5000,
            request_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
            object_store: ObjectStoreConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Whether persisted data lives only in this process and is lost on
    /// restart: the embedded measure engine, or columnar on a memory store.
    pub fn is_ephemeral(&self) -> bool {
        match self.backend {
            BackendKind::Measure => true,
            BackendKind::Elasticsearch => false,
            BackendKind::Columnar => self.object_store == ObjectStoreConfig::Memory,
        }
    }
}

/// Object store used by the columnar backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ObjectStoreConfig {
    #[default]
    Memory,
    S3 {
        bucket: String,
        region: String,
        endpoint: Option<String>,
    },
}

/// Supported storage engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Time-series stream/measure engine, embedded in-process and held in
    /// memory. For development, tests and single-node trials.
    Measure,
    /// Document search engine
    Elasticsearch,
    /// Parquet objects on an object store
    Columnar,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Measure => "measure",
            Self::Elasticsearch => "elasticsearch",
            Self::Columnar => "columnar",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "measure" | "banyandb" => Ok(Self::Measure),
            "elasticsearch" | "es" => Ok(Self::Elasticsearch),
            "columnar" | "parquet" => Ok(Self::Columnar),
            other => Err(format!(
                "unknown storage backend '{}'; expected one of measure, elasticsearch, columnar",
                other
            )),
        }
    }
}

/// Re-exports for convenience
pub mod prelude {
    pub use crate::dao::{BatchDao, StorageDao};
    pub use crate::ingest::{Source, SourceReceiver};
    pub use crate::model::{Record, RecordDescriptor, StorageEntity, Value};
    pub use crate::module::ModuleManager;
    pub use crate::provider::StorageProvider;
    pub use crate::schema::SchemaRegistry;
    pub use crate::{BackendKind, Error, Result, StorageConfig};
}
