//! HLS packaging worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reelhls_media::FfmpegToolkit;
use reelhls_queue::RedisJobQueue;
use reelhls_storage::S3ObjectStore;
use reelhls_worker::{
    FetchConfig, HttpFetcher, HttpStatusReporter, StatusConfig, Worker, WorkerConfig, WorkerDeps,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing()?;

    info!("Starting reelhls-worker");

    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        return Err(e);
    }

    info!("Worker shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON for production.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("reelhls=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("creating work dir {}", config.work_dir.display()))?;

    FfmpegToolkit::check_available().context("FFmpeg toolchain unavailable")?;
    let toolkit = Arc::new(FfmpegToolkit::new(config.ffmpeg_timeout_secs));

    let queue = RedisJobQueue::from_env().context("creating job queue")?;
    queue.init().await.context("initializing job queue")?;

    let store = S3ObjectStore::from_env().context("creating object store")?;
    store
        .check_connectivity()
        .await
        .with_context(|| format!("bucket {} not reachable", store.bucket()))?;
    let fetcher = HttpFetcher::new(FetchConfig::from_env()).context("creating source fetcher")?;

    let status_config = StatusConfig::from_env();
    if status_config.url.is_none() {
        info!("STATUS_CALLBACK_URL not set, terminal status will only be logged");
    }
    let status = HttpStatusReporter::new(status_config).context("creating status reporter")?;

    let worker = Arc::new(Worker::new(
        config,
        WorkerDeps {
            queue: Arc::new(queue),
            store: Arc::new(store),
            toolkit,
            fetcher: Arc::new(fetcher),
            status: Arc::new(status),
        },
    ));

    // Setup signal handler
    let signal_worker = Arc::clone(&worker);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_worker.shutdown();
        }
    });

    worker.run().await?;
    Ok(())
}
