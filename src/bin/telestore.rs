//! telestore server binary
//!
//! Runs the storage provider for the configured backend, the metrics flush
//! timer and the HTTP API until SIGINT/SIGTERM, then drains the write
//! pipeline before exiting.

use telestore::api::{self, ApiState};
use telestore::client::ClientControl;
use telestore::config::ConfigService;
use telestore::dao::{BatchDao, StorageDao};
use telestore::health::{GaugeMetricsCreator, MetricsCreator};
use telestore::ingest::{NamingControl, ServiceManagementHandler, SourceReceiver};
use telestore::module::{ModuleManager, CORE, STORAGE, TELEMETRY};
use telestore::provider::StorageProvider;
use telestore::telemetry::Telemetry;
use telestore::{BackendKind, Error, StorageConfig};

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// telestore
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP API port
    #[arg(long, env = "TELESTORE_HTTP_PORT", default_value = "12800")]
    http_port: u16,

    /// Storage backend: elasticsearch, columnar, or measure (embedded,
    /// in-memory, development only). No default; set it explicitly.
    #[arg(long, env = "STORAGE_BACKEND")]
    backend: String,

    /// Period of the pending-metrics flush in seconds
    #[arg(long, env = "TELESTORE_METRICS_FLUSH_SECS", default_value = "25")]
    metrics_flush_secs: u64,

    /// Service name length limit
    #[arg(long, default_value = "70")]
    service_name_max_length: usize,

    /// Instance name length limit
    #[arg(long, default_value = "70")]
    instance_name_max_length: usize,

    /// Endpoint name length limit
    #[arg(long, default_value = "150")]
    endpoint_name_max_length: usize,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut storage_config = StorageConfig::from_env()?;
    storage_config.backend = args.backend.parse::<BackendKind>().map_err(Error::Config)?;
    if args.metrics_flush_secs == 0 {
        return Err(Error::Config("metrics_flush_secs must be greater than 0".to_string()).into());
    }

    let _telemetry = Telemetry::init_for_component(
        "telestore",
        storage_config.backend.as_str(),
        &args.log_level,
    )?;

    info!(backend = %storage_config.backend, "Starting telestore");

    let manager = ModuleManager::new();
    manager
        .register_module(CORE)
        .register_service(Arc::new(ConfigService::new(storage_config.clone())));
    manager
        .register_module(TELEMETRY)
        .register_service::<dyn MetricsCreator>(Arc::new(GaugeMetricsCreator));

    let provider = StorageProvider::new(storage_config);
    provider.prepare(&manager)?;
    provider.start(&manager).await?;

    let storage = manager.find(STORAGE)?;
    let receiver = Arc::new(SourceReceiver::new(storage.get_service::<dyn StorageDao>()?));
    manager.register_module(CORE).register_service(receiver.clone());

    let metrics_shutdown = CancellationToken::new();
    let metrics_timer = tokio::spawn(receiver.clone().run_metrics_timer(
        Duration::from_secs(args.metrics_flush_secs),
        metrics_shutdown.clone(),
    ));

    let naming = NamingControl::new(
        args.service_name_max_length,
        args.instance_name_max_length,
        args.endpoint_name_max_length,
    );
    let router = api::build_http_router(ApiState {
        client: storage.get_service::<dyn ClientControl>()?,
        batch_dao: storage.get_service::<dyn BatchDao>()?,
        management: Arc::new(ServiceManagementHandler::new(receiver, naming)),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], args.http_port));
    let listener = TcpListener::bind(addr).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    info!(http_port = args.http_port, "telestore ready");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .await
        .map_err(|e| Error::Internal(format!("HTTP server error: {e}")));

    info!("telestore shutting down");

    metrics_shutdown.cancel();
    if let Err(e) = metrics_timer.await {
        error!(error = %e, "Metrics timer task failed");
    }
    if let Err(e) = provider.shutdown().await {
        error!(error = %e, "Storage provider did not drain cleanly");
    }

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    let _ = shutdown.changed().await;
}
