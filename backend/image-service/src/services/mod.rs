/// Service layer for images
///
/// This module provides business logic for:
/// - Storage: date-sharded originals and thumbnails on the local filesystem
/// - Ingest: upload deduplication and eager thumbnail ladder
/// - Thumbnail: on-demand generation coordinated over the shared cache
use std::sync::Arc;

use anyhow::Context;
use redis_utils::RedisPool;
use tracing::info;

use crate::cache::{PreviewCache, RedisPreviewCache};
use crate::config::{Config, ImageConfig};
use crate::db::{self, ImageRegistry, PgImageRegistry};

pub mod ingest;
pub mod storage;
pub mod thumbnail;

pub use ingest::{IngestOutcome, IngestService};
pub use storage::ImageStorage;
pub use thumbnail::{
    ThumbnailConfig, ThumbnailCoordinator, ThumbnailGenerator, ThumbnailProcessor,
    ThumbnailSettings, ThumbnailWorker, WaiterRegistry,
};

/// Everything a process needs to serve and generate images.
///
/// The coordinator and the worker share one waiter registry, so done
/// messages received by the worker wake this process's requests.
#[derive(Clone)]
pub struct ImageServices {
    pub registry: Arc<dyn ImageRegistry>,
    pub coordinator: Arc<ThumbnailCoordinator>,
    pub ingest: Arc<IngestService>,
    pub worker: Arc<ThumbnailWorker>,
    pub upload_max_bytes: usize,
}

impl ImageServices {
    /// Connect PostgreSQL and Redis and prepare the storage directories
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config.database)
            .await
            .context("failed to initialize database")?;
        let redis = RedisPool::connect(&config.cache.redis_url).await?;

        let storage = ImageStorage::new(&config.image.dir, &config.image.temp_dir);
        storage
            .ensure_dirs()
            .await
            .context("failed to create image directories")?;
        info!(root = %storage.root().display(), "Image storage ready");

        Ok(Self::new(
            &config.image,
            Arc::new(PgImageRegistry::new(pool)),
            Arc::new(RedisPreviewCache::new(&redis)),
        ))
    }

    pub fn new(
        config: &ImageConfig,
        registry: Arc<dyn ImageRegistry>,
        cache: Arc<dyn PreviewCache>,
    ) -> Self {
        let settings = ThumbnailSettings::from(config);
        let storage = ImageStorage::new(&config.dir, &config.temp_dir);
        let processor = Arc::new(ThumbnailProcessor::new(ThumbnailConfig {
            quality: settings.jpeg_quality,
        }));
        let waiters = Arc::new(WaiterRegistry::new());

        let coordinator = Arc::new(ThumbnailCoordinator::new(
            registry.clone(),
            cache.clone(),
            storage.clone(),
            waiters.clone(),
            settings.clone(),
        ));
        let ingest = Arc::new(IngestService::new(
            registry.clone(),
            storage.clone(),
            processor.clone(),
            settings.min_log2,
        ));
        let generator = Arc::new(ThumbnailGenerator::new(
            registry.clone(),
            storage,
            processor,
            &settings,
        ));
        let worker = Arc::new(ThumbnailWorker::new(
            generator,
            cache,
            waiters,
            settings,
        ));

        Self {
            registry,
            coordinator,
            ingest,
            worker,
            upload_max_bytes: config.upload_max_bytes,
        }
    }
}
