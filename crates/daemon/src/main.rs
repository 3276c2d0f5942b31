//! Kiln - Main Entry Point
//! Composition root: config, logging, store, processors, workers, reaper, RPC
//!
//! With `KILN_STORE=remote` the process is a worker fleet only: jobs are
//! pulled from other Kiln servers and no store, reaper or RPC server runs here.

mod config;
mod logging;

use anyhow::{Context, Result};
use config::{DaemonConfig, StoreKind};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use kiln_api_rpc::{RpcJobSource, RpcServer, RpcServerConfig, ServerHandle};
use kiln_core::application::worker::constants::DEFAULT_HOUSEKEEPING_INTERVAL;
use kiln_core::application::{
    shutdown_channel, BatchTransfer, JobQueue, JobService, LeaseReaper, MaintenanceScheduler,
    ProcessorRegistry, ShutdownSender, Worker, WorkerConfig, WorkerDeps,
};
use kiln_core::memory::InMemoryJobStore;
use kiln_core::port::id_provider::UuidProvider;
use kiln_core::port::time_provider::SystemTimeProvider;
use kiln_core::port::{
    BlobStore, IdProvider, JobSource, JobStore, Processor, ResourceFetcher, TimeProvider,
};
use kiln_infra_http::{
    ComfyUiConfig, ComfyUiProcessor, FaceSwapConfig, FaceSwapProcessor, HttpCallbackNotifier,
    HttpResourceFetcher, LocalBlobStore,
};
use kiln_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long shutdown waits for in-flight jobs before exiting
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration (.env is optional)
    let dotenv_path = dotenvy::dotenv().ok();
    let config = DaemonConfig::from_env().context("invalid configuration")?;

    // 2. Logging
    let _log_guard = logging::init(&config)?;
    info!("Kiln v{} starting...", VERSION);
    if let Some(path) = dotenv_path {
        info!(path = %path.display(), "Loaded environment file");
    }

    // 3. Processors, transfers, callbacks
    let registry = Arc::new(build_registry(&config)?);
    for (pattern, processor) in registry.patterns() {
        info!(pattern = %pattern, processor = %processor, "Processor registered");
    }
    let fetcher: Arc<dyn ResourceFetcher> =
        Arc::new(HttpResourceFetcher::new(config.transfer.fetch_timeout));
    let blob_store: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(
        config.blob_dir.clone(),
        config.blob_base_url.clone(),
    ));
    let notifier = Arc::new(HttpCallbackNotifier::new(config.callback_timeout));

    let (shutdown_tx, _) = shutdown_channel();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // 4. Job source: a local store served over RPC, or remote Kiln servers
    let (source, rpc_handle): (Arc<dyn JobSource>, Option<ServerHandle>) = match config.store {
        StoreKind::Remote => {
            let remote = RpcJobSource::new(config.task_api_urls.clone(), config.task_api_timeout)
                .context("invalid task API configuration")?;
            info!(sources = ?remote.urls(), "Pulling jobs from remote Kiln servers");
            let source: Arc<dyn JobSource> = Arc::new(remote);
            (source, None)
        }
        StoreKind::Memory | StoreKind::Sqlite => {
            let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
            let id_provider: Arc<dyn IdProvider> = Arc::new(UuidProvider);
            let store = build_store(&config, time_provider, id_provider).await?;
            let (rpc_addr, handle) = serve_local(&config, &store, &shutdown_tx, &mut tasks).await?;
            info!(rpc = %rpc_addr, "JSON-RPC server listening");
            let source: Arc<dyn JobSource> = Arc::new(JobQueue::new(store));
            (source, Some(handle))
        }
    };

    // 5. Workers
    let deps = WorkerDeps {
        source,
        registry,
        notifier,
    };
    let worker_config = WorkerConfig {
        filter: config.filter.clone(),
        poll_interval: config.poll_interval,
        heartbeat_interval: config.heartbeat_interval,
        processor_timeout: config.processor_timeout,
        default_callback: config.callback_url.clone(),
        callback_on_start: config.callback_on_start,
        ..WorkerConfig::default()
    };
    for i in 0..config.workers {
        let transfer = BatchTransfer::new(
            Arc::clone(&fetcher),
            Arc::clone(&blob_store),
            config.transfer.clone(),
        );
        let worker = Worker::new(
            format!("worker-{}", i),
            deps.clone(),
            transfer,
            worker_config.clone(),
        );
        let token = shutdown_tx.token();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = worker.run(token).await {
                error!(worker = %worker.name(), error = ?e, "Worker failed");
            }
        }));
    }

    info!(
        workers = config.workers,
        filter = %config.filter,
        "System ready. Waiting for jobs..."
    );

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Draining in-flight jobs...");

    // 7. Graceful shutdown: stop intake, let held jobs finish
    shutdown_tx.shutdown();
    if let Some(handle) = rpc_handle {
        handle
            .stop()
            .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    }

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task ended abnormally");
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "Grace period elapsed; unfinished jobs will be reclaimed after their lease expires"
        );
    }

    info!("Shutdown complete.");
    Ok(())
}

/// Startup recovery, the RPC server, and the reaper and housekeeping tasks
async fn serve_local(
    config: &DaemonConfig,
    store: &Arc<dyn JobStore>,
    shutdown_tx: &ShutdownSender,
    tasks: &mut Vec<JoinHandle<()>>,
) -> Result<(SocketAddr, ServerHandle)> {
    // Jobs held by a previous process that died
    let reaper = LeaseReaper::new(Arc::clone(store), config.lease, config.reap_interval);
    match reaper.run_once().await {
        Ok(ids) => info!(reclaimed = ids.len(), "Startup lease recovery completed"),
        Err(e) => error!(error = %e, "Startup lease recovery failed"),
    }

    let rpc_config = RpcServerConfig {
        host: config.rpc_host.clone(),
        port: config.rpc_port,
    };
    let service = Arc::new(JobService::new(Arc::clone(store)));
    let started = RpcServer::new(rpc_config, service)
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    let token = shutdown_tx.token();
    tasks.push(tokio::spawn(async move { reaper.run(token).await }));

    let housekeeping = MaintenanceScheduler::new(
        Arc::clone(store),
        config.retention,
        DEFAULT_HOUSEKEEPING_INTERVAL,
    );
    let token = shutdown_tx.token();
    tasks.push(tokio::spawn(async move { housekeeping.run(token).await }));

    Ok(started)
}

async fn build_store(
    config: &DaemonConfig,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
) -> Result<Arc<dyn JobStore>> {
    match config.store {
        StoreKind::Memory => {
            warn!("Using in-memory job store; jobs do not survive a restart");
            Ok(Arc::new(InMemoryJobStore::new(time_provider, id_provider)))
        }
        StoreKind::Sqlite | StoreKind::Remote => {
            if let Some(parent) = config.db_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("cannot create {}", parent.display()))?;
            }
            info!(db_path = %config.db_path.display(), "Initializing database...");

            let url = format!("sqlite://{}", config.db_path.display());
            let pool = create_pool(&url).await.context("DB pool creation failed")?;
            run_migrations(&pool).await.context("Migration failed")?;
            Ok(Arc::new(SqliteJobStore::new(pool, time_provider, id_provider)))
        }
    }
}

/// `face_swap` to the face-swap engine; everything else to ComfyUI
fn build_registry(config: &DaemonConfig) -> Result<ProcessorRegistry> {
    let comfyui: Arc<dyn Processor> = Arc::new(ComfyUiProcessor::new(ComfyUiConfig {
        max_wait: config.processor_timeout,
        ..ComfyUiConfig::new(config.comfyui_url.clone())
    }));
    let face_swap: Arc<dyn Processor> = Arc::new(FaceSwapProcessor::new(FaceSwapConfig::new(
        config.face_swap_url.clone(),
    )));

    let mut registry = ProcessorRegistry::new();
    registry.register("face_swap", face_swap)?;
    registry.register("comfyui_*", Arc::clone(&comfyui))?;
    registry.register("*", comfyui)?;
    Ok(registry)
}
