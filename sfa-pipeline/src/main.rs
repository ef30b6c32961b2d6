//! sfa-pipeline - Music processing pipeline service
//!
//! Orchestrates the three-stage pipeline (download, stem separation,
//! feature analysis) over a durable SQLite-backed work queue, with
//! progress published over SSE.

use anyhow::Result;
use sfa_common::config::{resolve_root_folder, PipelineConfig};
use sfa_common::events::EventBus;
use sfa_pipeline::coordinator::Coordinator;
use sfa_pipeline::executors::PipelineContext;
use sfa_pipeline::queue::QueueWorkers;
use sfa_pipeline::services::Adapters;
use sfa_pipeline::AppState;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting sfa-pipeline");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let root_folder = resolve_root_folder(None);
    std::fs::create_dir_all(&root_folder)?;
    info!("Root folder: {}", root_folder.display());

    let config = Arc::new(PipelineConfig::load_or_default(&root_folder));

    let db_path = root_folder.join("sfa.db");
    info!("Database: {}", db_path.display());
    let db = sfa_pipeline::db::init_database_pool(&db_path).await?;

    let event_bus = EventBus::new(256);
    let adapters = Adapters::from_config(&config);

    let ctx = PipelineContext {
        db: db.clone(),
        sink: Arc::new(event_bus.clone()),
        config: config.clone(),
        adapters,
        root_folder,
    };
    let coordinator = Coordinator::new(ctx);

    let shutdown = CancellationToken::new();
    let workers = QueueWorkers::spawn(coordinator.clone(), shutdown.clone());
    info!(
        download = config.queue.download_workers,
        processing = config.queue.processing_workers,
        analysis = config.queue.analysis_workers,
        "Queue workers started"
    );

    let state = AppState::new(db, event_bus, coordinator);
    let app = sfa_pipeline::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    shutdown.cancel();
    workers.shutdown().await;
    info!("sfa-pipeline stopped");
    Ok(())
}
