//! Thumbnail coordinator - resolves image requests and dispatches missing sizes
//!
//! A missing thumbnail is claimed with an atomic SET NX on its task key, so
//! only one requester system-wide dispatches it. Every requester then waits
//! on the done channel, bounded by the configured timeout, and falls back to
//! the original when generation does not finish in time.

use super::sizing::quantize_width;
use super::waiters::{wait_for, WaiterRegistry};
use super::ThumbnailSettings;
use crate::cache::{preview_task_key, PreviewCache, TaskState, PREVIEW_TASK_CHANNEL};
use crate::db::ImageRegistry;
use crate::error::{AppError, Result};
use crate::models::{
    content_type_for, CachedImage, ImageRequest, ResolvedImage, ServedVariant, ThumbnailTask,
};
use crate::services::storage::ImageStorage;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Claim attempts before assuming another requester owns the task
const CLAIM_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    /// This requester claimed and published the task
    Dispatched,
    /// Another requester holds the claim
    InFlight,
    /// The width showed up in the registry while claiming
    AlreadyGenerated,
}

pub struct ThumbnailCoordinator {
    registry: Arc<dyn ImageRegistry>,
    cache: Arc<dyn PreviewCache>,
    storage: ImageStorage,
    waiters: Arc<WaiterRegistry>,
    settings: ThumbnailSettings,
}

impl ThumbnailCoordinator {
    pub fn new(
        registry: Arc<dyn ImageRegistry>,
        cache: Arc<dyn PreviewCache>,
        storage: ImageStorage,
        waiters: Arc<WaiterRegistry>,
        settings: ThumbnailSettings,
    ) -> Self {
        Self {
            registry,
            cache,
            storage,
            waiters,
            settings,
        }
    }

    /// Resolve `<uuid>` or `<uuid>:<size>` to the bytes that should be served.
    ///
    /// Only `BadRequest` and `NotFound` are returned for the thumbnail path;
    /// generation problems degrade to the original file.
    pub async fn resolve_image(&self, param: &str) -> Result<ResolvedImage> {
        let request = ImageRequest::parse(param)?;
        let image = self.load_image(request.uuid).await?;

        let Some(requested) = request.size else {
            return self.serve_original(&image, ServedVariant::Original).await;
        };

        let width = quantize_width(requested, image.meta.width, self.settings.min_log2);

        if image.meta.has_thumb(width) {
            return self
                .serve_thumbnail(&image, width, ServedVariant::Cached)
                .await;
        }

        if self.await_generation(request.uuid, width).await {
            self.serve_thumbnail(&image, width, ServedVariant::Generated)
                .await
        } else {
            debug!(uuid = %request.uuid, width, "Thumbnail not ready, serving original");
            self.serve_original(&image, ServedVariant::Fallback).await
        }
    }

    /// Metadata from the cache, falling back to the registry on a miss.
    /// Cache failures never fail the request.
    async fn load_image(&self, uuid: Uuid) -> Result<CachedImage> {
        match self.cache.get_image(uuid).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => warn!(%uuid, error = %e, "Image metadata cache read failed"),
        }

        let record = self
            .registry
            .find_by_uuid(uuid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Image not found: {uuid}")))?;

        let cached = CachedImage::from(&record);
        // This write can land after a worker's invalidate and cache a stale
        // `thumbs`. The next request for that width re-dispatches and the
        // worker's already-present path invalidates the entry again.
        if let Err(e) = self
            .cache
            .put_image(uuid, &cached, self.settings.meta_cache_ttl)
            .await
        {
            warn!(%uuid, error = %e, "Image metadata cache write failed");
        }

        Ok(cached)
    }

    /// Make sure a task for `(uuid, width)` is in flight and wait for it.
    /// Returns true once the thumbnail is known to exist.
    async fn await_generation(&self, uuid: Uuid, width: u32) -> bool {
        let key = preview_task_key(uuid, width);
        let rx = self.waiters.register(&key);

        match self.ensure_dispatched(uuid, width, &key).await {
            Ok(Dispatch::AlreadyGenerated) => return true,
            Ok(Dispatch::Dispatched) => debug!(task_key = %key, "Thumbnail task dispatched"),
            Ok(Dispatch::InFlight) => debug!(task_key = %key, "Joining in-flight thumbnail task"),
            Err(e) => {
                warn!(task_key = %key, error = %e, "Failed to dispatch thumbnail task");
                return false;
            }
        }

        wait_for(rx, self.settings.wait_timeout).await
    }

    async fn ensure_dispatched(&self, uuid: Uuid, width: u32, key: &str) -> Result<Dispatch> {
        let ttl = self.settings.task_ttl;

        for _ in 0..CLAIM_ATTEMPTS {
            if self.cache.claim_task(key, ttl).await? {
                let task = ThumbnailTask {
                    uuid,
                    thumbs_size: width,
                };
                if let Err(e) = self.publish_task(key, &task).await {
                    // Release the claim so the next request can retry.
                    if let Err(del) = self.cache.delete_task(key).await {
                        warn!(task_key = %key, error = %del, "Failed to release task claim");
                    }
                    return Err(e);
                }
                return Ok(Dispatch::Dispatched);
            }

            match self.cache.get_task(key).await? {
                TaskState::Idle | TaskState::Dispatched(_) => return Ok(Dispatch::InFlight),
                TaskState::Absent => {
                    // Finished between our metadata read and the claim.
                    let record = self.registry.find_by_uuid(uuid).await?;
                    if record.map_or(false, |r| r.meta.has_thumb(width)) {
                        return Ok(Dispatch::AlreadyGenerated);
                    }
                }
            }
        }

        Ok(Dispatch::InFlight)
    }

    async fn publish_task(&self, key: &str, task: &ThumbnailTask) -> Result<()> {
        self.cache
            .dispatch_task(key, task, self.settings.task_ttl)
            .await?;
        self.cache.publish(PREVIEW_TASK_CHANNEL, key).await
    }

    async fn serve_original(
        &self,
        image: &CachedImage,
        variant: ServedVariant,
    ) -> Result<ResolvedImage> {
        let file = self
            .storage
            .original_path(&image.path, &image.meta.format);
        let bytes = self.storage.read(&file).await?;

        Ok(ResolvedImage {
            bytes,
            content_type: content_type_for(&image.meta.format),
            variant,
        })
    }

    async fn serve_thumbnail(
        &self,
        image: &CachedImage,
        width: u32,
        variant: ServedVariant,
    ) -> Result<ResolvedImage> {
        let file = self.storage.thumb_path(&image.path, width);
        match self.storage.read(&file).await {
            Ok(bytes) => Ok(ResolvedImage {
                bytes,
                content_type: "image/jpeg",
                variant,
            }),
            Err(e) => {
                warn!(path = %image.path, width, error = %e, "Thumbnail unreadable, serving original");
                self.serve_original(image, ServedVariant::Fallback).await
            }
        }
    }
}
