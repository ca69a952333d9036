//! Octopus Backend Binary
//!
//! Main entry point for the Octopus BIM backend appliance.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use octopus_backend_lib::config::{Config, DatabaseProvider, StorageProviderKind};
use octopus_backend_lib::constants::upload::SWEEP_INTERVAL_SECS;
use octopus_backend_lib::create_app;
use octopus_backend_lib::log::initialize_logging;
use octopus_backend_lib::persistence::{InMemoryStore, SqliteStore, Store};
use octopus_backend_lib::processing::handlers::{ConvertWexBimHandler, ExtractPropertiesHandler};
use octopus_backend_lib::processing::ifc::{StubIfcPropertyReader, StubWexBimConverter};
use octopus_backend_lib::processing::{
    BroadcastProgressNotifier, HandlerRegistry, InProcessQueue, JobDispatcher, JobQueue,
    ProgressNotifier,
};
use octopus_backend_lib::services::Services;
use octopus_backend_lib::storage::{LocalDiskStorageProvider, StorageProvider};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "octopus-backend")]
#[command(about = "Octopus BIM Backend Appliance", long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Override server host
    #[arg(long)]
    host: Option<String>,

    /// Override server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override database connection string
    #[arg(long)]
    database_url: Option<String>,

    /// Override number of background processing workers
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;
    initialize_logging(config.log_format.resolve());

    info!("starting Octopus backend appliance");
    info!(host = %config.host, port = config.port, "server configuration loaded");

    let store: Arc<dyn Store> = match config.database.provider {
        DatabaseProvider::Sqlite => {
            let max_connections = octopus_backend_lib::constants::database::DEFAULT_MAX_CONNECTIONS;
            Arc::new(
                SqliteStore::connect(&config.database.connection_string, max_connections)
                    .await
                    .context("failed to connect to sqlite database")?,
            )
        }
        DatabaseProvider::Postgres | DatabaseProvider::Sqlserver => {
            // Non-goal: only sqlite is wired as a real backend today. The
            // in-memory store keeps the appliance runnable against a config
            // that names an as-yet-unimplemented provider rather than
            // refusing to start.
            tracing::warn!(
                provider = ?config.database.provider,
                "this database provider has no persistence backend yet; falling back to an in-memory store"
            );
            Arc::new(InMemoryStore::new())
        }
    };

    let storage: Arc<dyn StorageProvider> = match config.storage.provider {
        StorageProviderKind::LocalDisk => Arc::new(LocalDiskStorageProvider::new(config.storage.local_disk_root.clone())),
        StorageProviderKind::AzureBlob => {
            tracing::warn!("azureBlob storage has no backend yet; falling back to local disk");
            Arc::new(LocalDiskStorageProvider::new(config.storage.local_disk_root.clone()))
        }
    };

    let progress: Arc<dyn ProgressNotifier> = Arc::new(BroadcastProgressNotifier::new());
    let services = Services::with_progress_notifier(config.clone(), store.clone(), storage.clone(), progress.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let queue: Arc<dyn JobQueue> = Arc::new(InProcessQueue::new());
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(ConvertWexBimHandler::new(
        store.clone(),
        storage.clone(),
        Arc::new(StubWexBimConverter),
        progress.clone(),
    )));
    registry.register(Arc::new(ExtractPropertiesHandler::new(
        store.clone(),
        storage.clone(),
        Arc::new(StubIfcPropertyReader),
        progress.clone(),
    )));
    let registry = Arc::new(registry);

    let dispatcher = JobDispatcher::new(store.clone(), queue.clone());
    tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { dispatcher.run(std::time::Duration::from_secs(1), shutdown_rx).await }
    });

    for worker_id in 0..config.processing.workers.max(1) {
        let queue = queue.clone();
        let registry = registry.clone();
        let store = store.clone();
        let processing_config = config.processing.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            octopus_backend_lib::processing::run_worker(worker_id, queue, registry, store, processing_config, shutdown_rx).await
        });
    }

    spawn_upload_sweep(services.clone(), shutdown_rx.clone());
    spawn_reclamation_sweep(services.clone(), shutdown_rx.clone());

    let app = create_app(services);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .context("failed to bind TCP listener")?;

    info!("server listening on http://{}:{}", config.host, config.port);

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => { result.context("server error")?; }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    }

    Ok(())
}

/// Periodically expires upload sessions whose reservation TTL has passed
/// without a commit (spec.md §4.2 upload state machine).
fn spawn_upload_sweep(services: Services, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { return; }
                }
                _ = interval.tick() => {
                    match services.files.expire_stale_sessions().await {
                        Ok(count) if count > 0 => tracing::debug!(count, "expired stale upload sessions"),
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "upload session sweep failed"),
                    }
                }
            }
        }
    });
}

/// Periodically reclaims the storage bytes of soft-deleted files
/// (SPEC_FULL §3 background reclamation supplement).
fn spawn_reclamation_sweep(services: Services, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { return; }
                }
                _ = interval.tick() => {
                    match services.files.reclaim_deleted_files(100).await {
                        Ok(count) if count > 0 => tracing::debug!(count, "reclaimed soft-deleted file bytes"),
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "reclamation sweep failed"),
                    }
                }
            }
        }
    });
}

fn load_config() -> Result<Config> {
    let args = Args::parse();

    let mut config = match args.config {
        Some(path) => Config::from_file(&path).with_context(|| format!("failed to read config file: {path}"))?,
        None => Config::default(),
    };

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database_url) = args.database_url {
        config.database.connection_string = database_url;
    }
    if let Some(workers) = args.workers {
        config.processing.workers = workers;
    }

    Ok(config)
}
