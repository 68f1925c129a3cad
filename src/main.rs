use anyhow::Context;
use dotenvy::dotenv;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod common;
mod config;
mod docs;
mod infrastructure;
mod modules;
mod routes;
mod state;
mod workers;

use config::settings::AppConfig;
use infrastructure::db::pool::{DbPool, connect_to_db, run_migrations};
use infrastructure::storage::s3::StorageService;
use modules::jobs::{JobStore, MemoryJobStore, PgJobStore};
use modules::render::{
    ArtifactPublisher, ElevenLabsSynthesizer, FfmpegAssembler, FfmpegRunner, LocalPublisher, RenderPipeline,
    S3Publisher, SilentSynthesizer, SpeechSynthesizer,
};
use state::AppState;
use workers::poller::Poller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vidsnap=debug,tower_http=debug"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting vidsnap...");

    let config = AppConfig::new().context("Invalid configuration")?;

    let (store, pool) = open_store(&config).await?;
    let pipeline = Arc::new(build_pipeline(&config).await?);

    let poller = Poller::new(store.clone(), pipeline, config.worker.clone());

    // `--once`: drain the queue a single time and exit, without serving HTTP.
    if std::env::args().any(|arg| arg == "--once") {
        let report = poller.run_once().await.context("Job store unavailable")?;
        info!(
            claimed = report.claimed,
            completed = report.completed,
            failed = report.failed,
            swept = report.swept,
            "Single pass finished"
        );
        if let Some(pool) = pool {
            pool.close().await;
        }
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let worker = {
        let cancel = cancel.clone();
        tokio::spawn(async move { poller.run(cancel).await })
    };

    let app = app::create_app(AppState::new(config.clone(), store));

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("HTTP server error")?;

    cancel.cancel();
    worker.await.context("Render worker panicked")?;

    if let Some(pool) = pool {
        pool.close().await;
        info!("Database pool closed");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn open_store(config: &AppConfig) -> anyhow::Result<(Arc<dyn JobStore>, Option<DbPool>)> {
    match &config.database_url {
        Some(url) => {
            let pool = connect_to_db(url).await.context("Failed to connect to database")?;
            run_migrations(&pool).await.context("Failed to run migrations")?;
            let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
            Ok((store, Some(pool)))
        }
        None => {
            warn!("DATABASE_URL not set, jobs are kept in memory and lost on restart");
            let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
            Ok((store, None))
        }
    }
}

async fn build_pipeline(config: &AppConfig) -> anyhow::Result<RenderPipeline> {
    tokio::fs::create_dir_all(&config.upload_root)
        .await
        .with_context(|| format!("Failed to create {}", config.upload_root.display()))?;

    let runner = FfmpegRunner::new(config.encoder.ffmpeg_path.clone(), config.encoder.timeout);
    match runner.locate() {
        Ok(path) => info!(ffmpeg = %path.display(), "Encoder found"),
        Err(e) => warn!("{e}; every render will fail until it is installed"),
    }

    let synthesizer: Arc<dyn SpeechSynthesizer> = match &config.speech {
        Some(speech) => Arc::new(ElevenLabsSynthesizer::new(speech.clone())?),
        None => {
            warn!("ELEVENLABS_API_KEY not set, narration will be silent");
            Arc::new(SilentSynthesizer::new(runner.clone()))
        }
    };

    let publisher: Arc<dyn ArtifactPublisher> = match &config.storage {
        Some(s3) => Arc::new(S3Publisher::new(StorageService::new(s3), s3.upload_timeout)),
        None => {
            info!(static_root = %config.static_root.display(), "Remote storage not configured, publishing locally");
            Arc::new(LocalPublisher::new(&config.static_root, &config.public_base_url))
        }
    };

    let assembler = Arc::new(FfmpegAssembler::new(runner, config.encoder.frame_duration_secs));

    info!(
        synthesizer = synthesizer.name(),
        publisher = publisher.mode(),
        "Render pipeline ready"
    );

    Ok(RenderPipeline::new(&config.upload_root, synthesizer, assembler, publisher))
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        // Without a signal handler, stay up until something else cancels.
        cancel.cancelled().await;
    }
    info!("🛑 Shutdown signal received");
    cancel.cancel();
}
