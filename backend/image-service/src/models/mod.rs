/// Data models for image-service
///
/// This module defines structures for:
/// - ImageRecord: persisted image metadata and its thumbnail set
/// - CachedImage: the metadata projection kept in Redis
/// - ThumbnailTask: the body of a dispatched generation task
/// - Request/response bodies for the HTTP surface
///
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{AppError, Result};

// ========================================
// Image Models
// ========================================

/// Where the bytes of an image live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageLocation {
    Local,
}

impl ImageLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            _ => None,
        }
    }
}

/// Decoded properties of the original plus the widths generated so far
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    /// Normalized extension: png, jpg or webp
    pub format: String,
    pub width: u32,
    pub height: u32,
    /// Size of the original in bytes
    pub size: u64,
    /// Generated thumbnail widths, ascending
    #[serde(default)]
    pub thumbs: Vec<u32>,
}

impl ImageMeta {
    pub fn has_thumb(&self, width: u32) -> bool {
        self.thumbs.contains(&width)
    }
}

/// Image row as stored in the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: i64,
    pub uuid: Uuid,
    pub sha256: String,
    pub location: ImageLocation,
    /// Directory relative to the storage root, `YYYY/MM/DD/<uuid>`
    pub path: String,
    pub meta: ImageMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a freshly ingested image
#[derive(Debug, Clone)]
pub struct NewImage {
    pub uuid: Uuid,
    pub sha256: String,
    pub location: ImageLocation,
    pub path: String,
    pub meta: ImageMeta,
}

/// Metadata hash cached under `db:image:uuid:<uuid>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    pub path: String,
    pub location: ImageLocation,
    pub meta: ImageMeta,
}

impl CachedImage {
    /// Hash fields written with HSET. `meta` is stored as a JSON string.
    pub fn to_fields(&self) -> Result<Vec<(&'static str, String)>> {
        Ok(vec![
            ("path", self.path.clone()),
            ("location", self.location.as_str().to_string()),
            ("meta", serde_json::to_string(&self.meta)?),
        ])
    }

    /// Rebuild from an HGETALL reply. Incomplete or malformed hashes yield `None`.
    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let path = fields.get("path")?.clone();
        let location = ImageLocation::from_str(fields.get("location")?)?;
        let meta = serde_json::from_str(fields.get("meta")?).ok()?;
        Some(Self {
            path,
            location,
            meta,
        })
    }
}

impl From<&ImageRecord> for CachedImage {
    fn from(record: &ImageRecord) -> Self {
        Self {
            path: record.path.clone(),
            location: record.location,
            meta: record.meta.clone(),
        }
    }
}

// ========================================
// Thumbnail Models
// ========================================

/// Task body written to the task key once dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailTask {
    pub uuid: Uuid,
    #[serde(rename = "thumbsSize")]
    pub thumbs_size: u32,
}

/// Parsed `<uuid>` or `<uuid>:<size>` route parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRequest {
    pub uuid: Uuid,
    pub size: Option<u32>,
}

impl ImageRequest {
    /// A size suffix is honored only when it is all digits; any other
    /// suffix is ignored and the original is served.
    pub fn parse(param: &str) -> Result<Self> {
        let parts: Vec<&str> = param.split(':').collect();

        let uuid = Uuid::parse_str(parts[0])
            .map_err(|_| AppError::BadRequest(format!("Invalid image id: {}", parts[0])))?;

        let size = match parts.as_slice() {
            [_, raw] if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) => {
                Some(raw.parse::<u32>().unwrap_or(u32::MAX))
            }
            _ => None,
        };

        Ok(Self { uuid, size })
    }
}

/// Which file ended up being served for an image request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedVariant {
    /// No size requested
    Original,
    /// Thumbnail already listed in the metadata
    Cached,
    /// Thumbnail produced while the request waited
    Generated,
    /// Generation did not finish in time or failed; original served instead
    Fallback,
}

impl ServedVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Cached => "cached",
            Self::Generated => "generated",
            Self::Fallback => "fallback",
        }
    }

    pub fn is_thumbnail(&self) -> bool {
        matches!(self, Self::Cached | Self::Generated)
    }
}

/// Bytes ready to be written to the HTTP response
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub variant: ServedVariant,
}

/// Content type for a normalized image format
pub fn content_type_for(format: &str) -> &'static str {
    match format {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

// ========================================
// API Bodies
// ========================================

/// Upload response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResponse {
    pub id: i64,
    pub uuid: Uuid,
    pub meta: ImageMeta,
}

impl From<ImageRecord> for ImageResponse {
    fn from(record: ImageRecord) -> Self {
        Self {
            id: record.id,
            uuid: record.uuid,
            meta: record.meta,
        }
    }
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Raw admin list query string
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_desc: Option<bool>,
}

/// Sortable columns of the admin list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSortField {
    Id,
    Sha256,
    CreatedAt,
}

impl ImageSortField {
    pub fn from_param(s: &str) -> Option<Self> {
        match s {
            "id" => Some(Self::Id),
            "sha256" => Some(Self::Sha256),
            "createdAt" => Some(Self::CreatedAt),
            _ => None,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Sha256 => "sha256",
            Self::CreatedAt => "created_at",
        }
    }
}

/// Validated list parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageListParams {
    pub page: u32,
    pub page_size: u32,
    pub sort_by: ImageSortField,
    pub sort_desc: bool,
}

impl ImageListParams {
    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }
}

impl ImageListQuery {
    /// Unknown sort columns are rejected; page and page size are clamped.
    pub fn validate(&self) -> Result<ImageListParams> {
        let sort_by = match self.sort_by.as_deref() {
            None | Some("") => ImageSortField::Id,
            Some(raw) => ImageSortField::from_param(raw)
                .ok_or_else(|| AppError::BadRequest(format!("Unsupported sortBy: {raw}")))?,
        };

        Ok(ImageListParams {
            page: self.page.unwrap_or(1).max(1),
            page_size: self
                .page_size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
            sort_by,
            sort_desc: self.sort_desc.unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageListRow {
    pub id: i64,
    pub uuid: Uuid,
    pub sha256: String,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl From<ImageRecord> for ImageListRow {
    fn from(record: ImageRecord) -> Self {
        Self {
            id: record.id,
            uuid: record.uuid,
            sha256: record.sha256,
            width: record.meta.width,
            height: record.meta.height,
            size: record.meta.size,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageListResponse {
    pub page: u32,
    pub page_size: u32,
    pub rows: Vec<ImageListRow>,
    pub total_rows: i64,
}
