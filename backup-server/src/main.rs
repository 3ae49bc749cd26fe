mod config;
mod error;
mod routes;
mod services;
mod state;

use crate::config::{AppConfig, Args};
use crate::services::continuation::{self, RetryPolicy};
use crate::state::AppState;
use backup_engine::sync::{LocalDirectoryProvider, ProviderSync};
use backup_engine::utils::logger;
use backup_engine::{BackupEngine, Config, Continuation};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().with_args(Args::parse());
    let engine_config = Config::from_file(&config.engine_config)?;

    // Initialize logging
    let log_level = config.log_level.as_deref().unwrap_or(&engine_config.log.level);
    logger::init(log_level)?;

    tracing::info!(
        "Starting backup server v{} on port {} (config {})",
        env!("CARGO_PKG_VERSION"),
        config.port,
        config.engine_config.display()
    );

    std::fs::create_dir_all(&engine_config.paths.backup_root)?;

    // Engine with its continuation queue and optional mirror
    let (queue, rx) = continuation::channel();
    let queue = Arc::new(queue);
    let mut engine = BackupEngine::open(engine_config)?.with_continuation(queue.clone());
    if let Some(mirror) = &config.mirror_dir {
        tracing::info!("Mirroring completed backups to {}", mirror.display());
        engine = engine.with_cloud_sync(Arc::new(ProviderSync::new(
            LocalDirectoryProvider::new(mirror),
            config.mirror_keep,
        )));
    }
    let engine = Arc::new(engine);

    let cancel = CancellationToken::new();
    let worker = continuation::start_worker(engine.clone(), rx, cancel.clone(), RetryPolicy::default());

    // Pick up a job interrupted by the previous shutdown
    match engine.active_job() {
        Ok(Some(job)) => {
            tracing::info!(session_id = %job.session_id, "Resuming {} backup at {}", job.job_type, job.step);
            queue.schedule(&job.session_id);
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("Failed to read job state: {e}"),
    }

    let state = Arc::new(AppState::new(engine, queue, config.clone()));
    let app = routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("Shutting down...");
    cancel.cancel();
    if let Err(e) = worker.await {
        tracing::warn!("Continuation worker ended abnormally: {e}");
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {e}");
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
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
