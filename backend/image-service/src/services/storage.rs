/// Local filesystem storage for originals and thumbnails
///
/// Layout: `<root>/<YYYY>/<MM>/<DD>/<uuid>/original.<ext>` and
/// `<root>/<YYYY>/<MM>/<DD>/<uuid>/<width>.jpg`.
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// An upload written to the temp directory, not yet part of the store
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
}

impl StagedUpload {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone)]
pub struct ImageStorage {
    root: PathBuf,
    temp_dir: PathBuf,
}

impl ImageStorage {
    pub fn new(root: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp_dir: temp_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the storage root and temp directory if missing
    pub async fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        fs::create_dir_all(&self.temp_dir).await?;
        Ok(())
    }

    /// Relative directory for an image uploaded at `at`
    pub fn relative_dir(at: DateTime<Utc>, uuid: Uuid) -> String {
        format!("{}/{uuid}", at.format("%Y/%m/%d"))
    }

    pub fn original_path(&self, path: &str, format: &str) -> PathBuf {
        self.root.join(path).join(format!("original.{format}"))
    }

    pub fn thumb_path(&self, path: &str, width: u32) -> PathBuf {
        self.root.join(path).join(format!("{width}.jpg"))
    }

    pub async fn read(&self, file: &Path) -> Result<Bytes> {
        let data = fs::read(file).await.map_err(|e| {
            AppError::StorageError(format!("Failed to read {}: {e}", file.display()))
        })?;
        Ok(Bytes::from(data))
    }

    /// Write through a sibling temp file and rename, so readers never
    /// observe a partially written file.
    pub async fn write_atomic(&self, file: &Path, data: &[u8]) -> Result<()> {
        let dir = file
            .parent()
            .ok_or_else(|| AppError::StorageError(format!("No parent for {}", file.display())))?;
        fs::create_dir_all(dir).await?;

        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = dir.join(format!(".{name}.{}.tmp", Uuid::new_v4()));

        fs::write(&tmp, data).await?;
        if let Err(e) = fs::rename(&tmp, file).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(AppError::StorageError(format!(
                "Failed to move {} into place: {e}",
                file.display()
            )));
        }

        debug!(file = %file.display(), bytes = data.len(), "Stored file");
        Ok(())
    }

    /// Write raw upload bytes into the temp directory
    pub async fn stage_upload(&self, data: &[u8]) -> Result<StagedUpload> {
        fs::create_dir_all(&self.temp_dir).await?;
        let path = self.temp_dir.join(Uuid::new_v4().to_string());
        fs::write(&path, data).await?;
        Ok(StagedUpload { path })
    }

    /// Move a staged upload to `<root>/<path>/original.<format>`
    pub async fn promote(&self, staged: StagedUpload, path: &str, format: &str) -> Result<PathBuf> {
        let target = self.original_path(path, format);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).await?;
        }

        // rename fails across filesystems; fall back to copy + remove.
        if fs::rename(&staged.path, &target).await.is_err() {
            let copied = fs::copy(&staged.path, &target).await;
            self.discard(staged).await;
            copied?;
        }

        Ok(target)
    }

    /// Remove a staged upload. Failures are logged only.
    pub async fn discard(&self, staged: StagedUpload) {
        match fs::remove_file(&staged.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(file = %staged.path.display(), error = %e, "Failed to remove staged upload"),
        }
    }

    /// Remove a stored image directory, used to roll back a failed ingest
    pub async fn remove_dir(&self, path: &str) {
        let dir = self.root.join(path);
        if let Err(e) = fs::remove_dir_all(&dir).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(dir = %dir.display(), error = %e, "Failed to remove image directory");
            }
        }
    }
}
