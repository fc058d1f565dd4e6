//! Thumbnail generator - renders one dispatched thumbnail and records it
//!
//! This service handles the generation step of a task:
//! 1. Re-read the image record from the registry
//! 2. Decode the original and render the requested width
//! 3. Write the JPEG next to the original
//! 4. Append the width to `meta.thumbs`

use super::processor::ThumbnailProcessor;
use super::ThumbnailSettings;
use crate::db::ImageRegistry;
use crate::error::{AppError, Result};
use crate::models::ThumbnailTask;
use crate::services::storage::ImageStorage;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateOutcome {
    /// File written and width appended
    Generated,
    /// Registry already lists the width; nothing written
    AlreadyPresent,
}

pub struct ThumbnailGenerator {
    registry: Arc<dyn ImageRegistry>,
    storage: ImageStorage,
    processor: Arc<ThumbnailProcessor>,
    min_width: u32,
}

impl ThumbnailGenerator {
    pub fn new(
        registry: Arc<dyn ImageRegistry>,
        storage: ImageStorage,
        processor: Arc<ThumbnailProcessor>,
        settings: &ThumbnailSettings,
    ) -> Self {
        Self {
            registry,
            storage,
            processor,
            min_width: settings.min_width(),
        }
    }

    pub async fn generate(&self, task: &ThumbnailTask) -> Result<GenerateOutcome> {
        let width = task.thumbs_size;
        if !width.is_power_of_two() || width < self.min_width {
            return Err(AppError::BadRequest(format!(
                "Thumbnail width {width} is not on the ladder"
            )));
        }

        let record = self
            .registry
            .find_by_uuid(task.uuid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Image not found: {}", task.uuid)))?;

        if record.meta.has_thumb(width) {
            debug!(uuid = %task.uuid, width, "Thumbnail already registered");
            return Ok(GenerateOutcome::AlreadyPresent);
        }

        let original = self
            .storage
            .read(&self.storage.original_path(&record.path, &record.meta.format))
            .await?;

        let thumbnail = self.processor.clone().generate_async(original, width).await?;

        self.storage
            .write_atomic(&self.storage.thumb_path(&record.path, width), &thumbnail.data)
            .await?;

        if !self.registry.append_thumb(task.uuid, width).await? {
            debug!(uuid = %task.uuid, width, "Width was appended concurrently");
        }

        info!(
            uuid = %task.uuid,
            width = thumbnail.width,
            height = thumbnail.height,
            size = thumbnail.data.len(),
            "Thumbnail created successfully"
        );

        Ok(GenerateOutcome::Generated)
    }
}
