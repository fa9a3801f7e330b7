//! Environment-based configuration
//!
//! Builds the [`StorageConfig`] and the object store behind the columnar
//! backend from environment variables, so deployments switch backends
//! without code changes.

use crate::{BackendKind, Error, ObjectStoreConfig, Result, StorageConfig};
use object_store::{aws::AmazonS3Builder, memory::InMemory, ObjectStore};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Core configuration published to other modules.
#[derive(Debug, Clone)]
pub struct ConfigService {
    storage: StorageConfig,
}

impl ConfigService {
    pub fn new(storage: StorageConfig) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    /// `http://host:port` of the configured backend.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.storage.host, self.storage.port)
    }
}

impl StorageConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`; unset keys keep defaults.
    ///
    /// Keys:
    /// - STORAGE_BACKEND: elasticsearch, columnar, or measure (the default,
    ///   embedded and in memory, for development and tests)
    /// - TELESTORE_HOST, TELESTORE_PORT, TELESTORE_NAMESPACE
    /// - TELESTORE_MAX_BULK_SIZE, TELESTORE_FLUSH_INTERVAL_SECS,
    ///   TELESTORE_CONCURRENT_WRITE_THREADS
    /// - TELESTORE_FETCH_TASK_LOG_MAX_SIZE, TELESTORE_METADATA_QUERY_MAX_SIZE
    /// - TELESTORE_REQUEST_TIMEOUT_SECS, TELESTORE_RECONNECT_INTERVAL_SECS,
    ///   TELESTORE_SHUTDOWN_TIMEOUT_SECS
    /// - OBJECT_STORE: memory (default) or s3, with S3_BUCKET, S3_REGION
    ///   (default us-east-1) and S3_ENDPOINT for MinIO/LocalStack
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(backend) = lookup("STORAGE_BACKEND") {
            config.backend = BackendKind::from_str(&backend).map_err(Error::Config)?;
        }
        if let Some(host) = lookup("TELESTORE_HOST") {
            config.host = host;
        }
        if let Some(namespace) = lookup("TELESTORE_NAMESPACE") {
            config.namespace = namespace;
        }
        parse_into(&lookup, "TELESTORE_PORT", &mut config.port)?;
        parse_into(&lookup, "TELESTORE_MAX_BULK_SIZE", &mut config.max_bulk_size)?;
        parse_into(
            &lookup,
            "TELESTORE_CONCURRENT_WRITE_THREADS",
            &mut config.concurrent_write_threads,
        )?;
        parse_into(
            &lookup,
            "TELESTORE_FETCH_TASK_LOG_MAX_SIZE",
            &mut config.fetch_task_log_max_size,
        )?;
        parse_into(
            &lookup,
            "TELESTORE_METADATA_QUERY_MAX_SIZE",
            &mut config.metadata_query_max_size,
        )?;
        parse_secs(&lookup, "TELESTORE_FLUSH_INTERVAL_SECS", &mut config.flush_interval)?;
        parse_secs(&lookup, "TELESTORE_REQUEST_TIMEOUT_SECS", &mut config.request_timeout)?;
        parse_secs(
            &lookup,
            "TELESTORE_RECONNECT_INTERVAL_SECS",
            &mut config.reconnect_interval,
        )?;
        parse_secs(
            &lookup,
            "TELESTORE_SHUTDOWN_TIMEOUT_SECS",
            &mut config.shutdown_timeout,
        )?;

        let object_store = lookup("OBJECT_STORE").unwrap_or_else(|| "memory".to_string());
        config.object_store = match object_store.as_str() {
            "memory" => ObjectStoreConfig::Memory,
            "s3" => ObjectStoreConfig::S3 {
                bucket: lookup("S3_BUCKET").ok_or_else(|| {
                    Error::Config("S3_BUCKET required when OBJECT_STORE=s3".to_string())
                })?,
                region: lookup("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: lookup("S3_ENDPOINT"),
            },
            other => {
                return Err(Error::Config(format!(
                    "Unknown OBJECT_STORE: {}. Use 'memory' or 's3'",
                    other
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_bulk_size", self.max_bulk_size),
            ("concurrent_write_threads", self.concurrent_write_threads),
            ("fetch_task_log_max_size", self.fetch_task_log_max_size),
            ("metadata_query_max_size", self.metadata_query_max_size),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }
        let durations = [
            ("flush_interval", self.flush_interval),
            ("request_timeout", self.request_timeout),
            ("reconnect_interval", self.reconnect_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if let ObjectStoreConfig::S3 { bucket, .. } = &self.object_store {
            if bucket.trim().is_empty() {
                return Err(Error::Config("S3 bucket must not be empty".to_string()));
            }
        }
        Ok(())
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{}: invalid value '{}': {}", key, raw, e)))?;
    }
    Ok(())
}

fn parse_secs<F>(lookup: &F, key: &str, target: &mut Duration) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let mut secs = target.as_secs();
    parse_into(lookup, key, &mut secs)?;
    *target = Duration::from_secs(secs);
    Ok(())
}

pub struct ComponentFactory;

impl ComponentFactory {
    /// Creates the object store for the columnar backend.
    ///
    /// S3 credentials come from AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY
    /// when set, otherwise from the instance role.
    pub fn create_object_store(config: &ObjectStoreConfig) -> Result<Arc<dyn ObjectStore>> {
        match config {
            ObjectStoreConfig::Memory => {
                info!("Using in-memory object store (development mode)");
                Ok(Arc::new(InMemory::new()))
            }
            ObjectStoreConfig::S3 {
                bucket,
                region,
                endpoint,
            } => {
                info!(bucket = %bucket, region = %region, "Using S3 object store");

                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(bucket)
                    .with_region(region);

                if let Some(endpoint) = endpoint {
                    info!(endpoint = %endpoint, "Using custom S3 endpoint");
                    builder = builder.with_endpoint(endpoint).with_allow_http(true);
                }
                if let Ok(key) = std::env::var("AWS_ACCESS_KEY_ID") {
                    builder = builder.with_access_key_id(&key);
                }
                if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
                    builder = builder.with_secret_access_key(&secret);
                }

                Ok(Arc::new(builder.build()?))
            }
        }
    }
}
