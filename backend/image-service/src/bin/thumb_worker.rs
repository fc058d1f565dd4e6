//! Thumbnail Worker - standalone generator for dispatched thumbnail tasks
//!
//! Subscribes to the preview task channel and generates thumbnails for any
//! image-service process sharing the same Redis and PostgreSQL. Generation is
//! always enabled here, so HTTP processes can run with
//! `IMAGE_ENABLED_CREATE_IMAGE_TASK=false`.
//!
//! Environment variables are the same as image-service:
//! - DATABASE_URL, DATABASE_MAX_CONNECTIONS, DATABASE_RUN_MIGRATIONS
//! - REDIS_URL
//! - DIR_IMAGES, DIR_TEMP_FILES
//! - IMAGE_MIN_PREVIEW_LOG_SIZE, IMAGE_JPEG_QUALITY, IMAGE_TASK_TTL_SECS

use image_service::services::ImageServices;
use image_service::Config;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thumb_worker=info,image_service=info".into()),
        )
        .init();

    info!("Starting Thumbnail Worker");

    let mut config = Config::from_env();
    config.image.enable_preview_task = true;
    info!(
        images = %config.image.dir.display(),
        min_preview_log_size = config.image.min_preview_log_size,
        "Configuration loaded"
    );

    let services = ImageServices::connect(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = services.worker.clone().start(shutdown_rx).await?;

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for ctrl+c, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    if let Err(e) = listener.await {
        error!(error = %e, "Thumbnail listener task failed");
    }

    info!("Thumbnail Worker stopped");
    Ok(())
}
