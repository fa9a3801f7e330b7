//! Storage provider lifecycle
//!
//! `prepare` builds the schema registry, converter, transport, client,
//! pipeline and DAO for the configured backend and publishes them in the
//! storage module. `start` registers and publishes the built-in record
//! types, wires the health gauge into the client and connects, failing
//! fast when the backend is unreachable.

use crate::backend::{ElasticsearchTransport, EmbeddedMeasureTransport, ObjectStoreTransport};
use crate::client::{BackendClient, ClientConfig, ClientControl, Transport};
use crate::config::{ComponentFactory, ConfigService};
use crate::converter::{ColumnarConverter, DocumentConverter, MeasureConverter, StorageConverter};
use crate::dao::{BatchDao, GenericStorageDao, StorageDao};
use crate::health::MetricsCreator;
use crate::module::{ModuleManager, CORE, STORAGE, TELEMETRY};
use crate::pipeline::PipelineConfig;
use crate::records::all_descriptors;
use crate::schema::SchemaRegistry;
use crate::{BackendKind, Error, Result, StorageConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Backend services with the converter and transport types erased.
type Assembled = (Arc<dyn StorageDao>, Arc<dyn BatchDao>, Arc<dyn ClientControl>);

struct Prepared {
    registry: Arc<SchemaRegistry>,
    batch_dao: Arc<dyn BatchDao>,
    client: Arc<dyn ClientControl>,
}

/// Storage module provider.
pub struct StorageProvider {
    config: StorageConfig,
    prepared: Mutex<Option<Prepared>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
}

impl StorageProvider {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            prepared: Mutex::new(None),
            reconnect: Mutex::new(None),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.config.backend
    }

    /// Builds the storage services and registers them in the storage module.
    ///
    /// Must run inside a tokio runtime; the pipeline timer starts here.
    pub fn prepare(&self, manager: &ModuleManager) -> Result<()> {
        self.config.validate()?;
        let registry = Arc::new(SchemaRegistry::new(self.config.backend));
        let client_config = ClientConfig {
            request_timeout: self.config.request_timeout,
            reconnect_interval: self.config.reconnect_interval,
        };

        if self.config.is_ephemeral() {
            warn!(
                backend = %self.config.backend,
                "Storage backend keeps data in process memory only; use it for development and tests"
            );
        }

        let (storage_dao, batch_dao, client) = match self.config.backend {
            BackendKind::Measure => self.assemble(
                &registry,
                MeasureConverter::new(self.config.namespace.clone()),
                EmbeddedMeasureTransport::default(),
                client_config,
            )?,
            BackendKind::Elasticsearch => {
                let endpoint = format!("http://{}:{}", self.config.host, self.config.port);
                self.assemble(
                    &registry,
                    DocumentConverter::new(self.config.namespace.clone()),
                    ElasticsearchTransport::new(endpoint, self.config.request_timeout)?,
                    client_config,
                )?
            }
            BackendKind::Columnar => {
                let store = ComponentFactory::create_object_store(&self.config.object_store)?;
                self.assemble(
                    &registry,
                    ColumnarConverter::new(),
                    ObjectStoreTransport::new(store, self.config.namespace.clone()),
                    client_config,
                )?
            }
        };

        let module = manager.register_module(STORAGE);
        module.register_service::<dyn StorageDao>(storage_dao);
        module.register_service::<dyn BatchDao>(batch_dao.clone());
        module.register_service(registry.clone());
        module.register_service::<dyn ClientControl>(client.clone());

        *self.prepared.lock() = Some(Prepared {
            registry,
            batch_dao,
            client,
        });
        info!(backend = %self.config.backend, "Storage provider prepared");
        Ok(())
    }

    fn assemble<C, T>(
        &self,
        registry: &Arc<SchemaRegistry>,
        converter: C,
        transport: T,
        client_config: ClientConfig,
    ) -> Result<Assembled>
    where
        C: StorageConverter,
        T: Transport<Request = C::Request, Row = C::Row>,
    {
        let client = Arc::new(BackendClient::new(transport, client_config));
        let pipeline =
            crate::pipeline::BatchPipeline::new(client.clone(), PipelineConfig::from(&self.config))?;
        let dao = Arc::new(GenericStorageDao::new(
            registry.clone(),
            converter,
            pipeline,
            self.config.metadata_query_max_size,
        ));
        let storage_dao: Arc<dyn StorageDao> = dao.clone();
        let batch_dao: Arc<dyn BatchDao> = dao;
        let client: Arc<dyn ClientControl> = client;
        Ok((storage_dao, batch_dao, client))
    }

    /// Publishes the schemas, hooks up health reporting and connects.
    pub async fn start(&self, manager: &ModuleManager) -> Result<()> {
        let (registry, client) = {
            let prepared = self.prepared.lock();
            let prepared = prepared
                .as_ref()
                .ok_or_else(|| Error::Module("storage provider started before prepare".to_string()))?;
            (prepared.registry.clone(), prepared.client.clone())
        };

        for descriptor in all_descriptors() {
            registry.register(descriptor)?;
        }
        registry.publish();

        let config = manager.find(CORE)?.get_service::<ConfigService>()?;
        let creator = manager.find(TELEMETRY)?.get_service::<dyn MetricsCreator>()?;
        let health = creator.create_health_check_metric(&format!("storage_{}", config.storage().backend));
        client.register_checker(health);

        if let Err(e) = client.connect().await {
            error!(backend = client.backend(), error = %e, "Storage backend unreachable at startup");
            return Err(e);
        }
        *self.reconnect.lock() = Some(client.clone().start_reconnect_loop());
        info!(backend = client.backend(), record_types = registry.record_types().len(), "Storage provider started");
        Ok(())
    }

    /// Drains the pipeline, then closes the client and its reconnect loop.
    pub async fn shutdown(&self) -> Result<()> {
        let (batch_dao, client) = {
            let prepared = self.prepared.lock();
            match prepared.as_ref() {
                Some(p) => (p.batch_dao.clone(), p.client.clone()),
                None => return Ok(()),
            }
        };
        let drained = batch_dao.shutdown().await;
        client.close().await?;
        let reconnect = self.reconnect.lock().take();
        if let Some(handle) = reconnect {
            let _ = handle.await;
        }
        info!(backend = client.backend(), "Storage provider stopped");
        drained
    }
}
