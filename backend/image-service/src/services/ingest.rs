/// Upload ingestion: dedup by content hash, store, pre-render the ladder
use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::ImageRegistry;
use crate::error::{AppError, Result};
use crate::models::{ImageLocation, ImageMeta, ImageRecord, NewImage};
use crate::services::storage::{ImageStorage, StagedUpload};
use crate::services::thumbnail::{thumbnail_ladder, ImageInfo, ThumbnailProcessor};

#[derive(Debug)]
pub enum IngestOutcome {
    Created(ImageRecord),
    /// Identical bytes were uploaded before; the upload was discarded
    Existing(ImageRecord),
}

impl IngestOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn into_record(self) -> ImageRecord {
        match self {
            Self::Created(record) | Self::Existing(record) => record,
        }
    }
}

pub struct IngestService {
    registry: Arc<dyn ImageRegistry>,
    storage: ImageStorage,
    processor: Arc<ThumbnailProcessor>,
    min_log2: u32,
}

impl IngestService {
    pub fn new(
        registry: Arc<dyn ImageRegistry>,
        storage: ImageStorage,
        processor: Arc<ThumbnailProcessor>,
        min_log2: u32,
    ) -> Self {
        Self {
            registry,
            storage,
            processor,
            min_log2,
        }
    }

    pub fn content_hash(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    pub async fn ingest(&self, data: Bytes) -> Result<IngestOutcome> {
        let info = self.processor.probe(&data)?;
        let staged = self.storage.stage_upload(&data).await?;
        let sha256 = Self::content_hash(&data);

        let existing = match self.registry.find_by_sha256(&sha256).await {
            Ok(existing) => existing,
            Err(e) => {
                self.storage.discard(staged).await;
                return Err(e);
            }
        };
        if let Some(existing) = existing {
            self.storage.discard(staged).await;
            info!(uuid = %existing.uuid, %sha256, "Duplicate upload, returning existing image");
            return Ok(IngestOutcome::Existing(existing));
        }

        let uuid = Uuid::new_v4();
        let path = ImageStorage::relative_dir(Utc::now(), uuid);

        let thumbs = match self.store(staged, &path, &info, data.clone()).await {
            Ok(thumbs) => thumbs,
            Err(e) => {
                self.storage.remove_dir(&path).await;
                return Err(e);
            }
        };

        let new_image = NewImage {
            uuid,
            sha256: sha256.clone(),
            location: ImageLocation::Local,
            path: path.clone(),
            meta: ImageMeta {
                format: info.format,
                width: info.width,
                height: info.height,
                size: data.len() as u64,
                thumbs,
            },
        };

        match self.registry.insert(new_image).await {
            Ok(Some(record)) => {
                info!(uuid = %record.uuid, path = %record.path, "Image created");
                Ok(IngestOutcome::Created(record))
            }
            Ok(None) => {
                // A concurrent upload of the same bytes won the insert.
                self.storage.remove_dir(&path).await;
                let record = self
                    .registry
                    .find_by_sha256(&sha256)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(format!("Image with hash {sha256} vanished after conflict"))
                    })?;
                Ok(IngestOutcome::Existing(record))
            }
            Err(e) => {
                self.storage.remove_dir(&path).await;
                Err(e)
            }
        }
    }

    /// Promote the original and render every ladder width. Returns the widths written.
    async fn store(
        &self,
        staged: StagedUpload,
        path: &str,
        info: &ImageInfo,
        data: Bytes,
    ) -> Result<Vec<u32>> {
        self.storage.promote(staged, path, &info.format).await?;

        let ladder = thumbnail_ladder(info.width, self.min_log2);
        let rendered = self
            .processor
            .clone()
            .generate_ladder_async(data, ladder)
            .await
            .map_err(|e| match e {
                AppError::CodecError(msg) => AppError::BadRequest(msg),
                other => other,
            })?;

        let mut thumbs = Vec::with_capacity(rendered.len());
        for thumb in rendered {
            self.storage
                .write_atomic(&self.storage.thumb_path(path, thumb.width), &thumb.data)
                .await?;
            thumbs.push(thumb.width);
        }

        if thumbs.is_empty() {
            debug!(%path, width = info.width, "Image narrower than the smallest thumbnail");
        }

        Ok(thumbs)
    }
}
