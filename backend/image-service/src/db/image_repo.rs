/// Image registry - persistent image metadata keyed by uuid and content hash
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ImageListParams, ImageLocation, ImageMeta, ImageRecord, NewImage};

const IMAGE_COLUMNS: &str = "id, uuid, sha256, location, path, meta, created_at, updated_at";

#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<ImageRecord>>;

    async fn find_by_sha256(&self, sha256: &str) -> Result<Option<ImageRecord>>;

    /// Insert a new image. Returns `None` when a record with the same
    /// content hash already exists.
    async fn insert(&self, image: NewImage) -> Result<Option<ImageRecord>>;

    /// Append `width` to `meta.thumbs` in a single statement.
    ///
    /// Returns false if the width was already listed or the image does not exist.
    async fn append_thumb(&self, uuid: Uuid, width: u32) -> Result<bool>;

    async fn list(&self, params: &ImageListParams) -> Result<Vec<ImageRecord>>;

    async fn count(&self) -> Result<i64>;
}

/// PostgreSQL-backed registry over the `images` table
#[derive(Clone)]
pub struct PgImageRegistry {
    pool: PgPool,
}

impl PgImageRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> std::result::Result<ImageRecord, sqlx::Error> {
        let location: String = row.try_get("location")?;
        let location = ImageLocation::from_str(&location).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown image location: {location}").into())
        })?;
        let Json(meta): Json<ImageMeta> = row.try_get("meta")?;

        Ok(ImageRecord {
            id: row.try_get("id")?,
            uuid: row.try_get("uuid")?,
            sha256: row.try_get("sha256")?,
            location,
            path: row.try_get("path")?,
            meta,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ImageRegistry for PgImageRegistry {
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<ImageRecord>> {
        let row = sqlx::query(&format!("SELECT {IMAGE_COLUMNS} FROM images WHERE uuid = $1"))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Self::map_row).transpose()?)
    }

    async fn find_by_sha256(&self, sha256: &str) -> Result<Option<ImageRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE sha256 = $1"
        ))
        .bind(sha256)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::map_row).transpose()?)
    }

    async fn insert(&self, image: NewImage) -> Result<Option<ImageRecord>> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO images (uuid, sha256, location, path, meta)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (sha256) DO NOTHING
            RETURNING {IMAGE_COLUMNS}
            "#
        ))
        .bind(image.uuid)
        .bind(&image.sha256)
        .bind(image.location.as_str())
        .bind(&image.path)
        .bind(Json(&image.meta))
        .fetch_optional(&self.pool)
        .await?;

        if row.is_none() {
            debug!(sha256 = %image.sha256, "Image insert skipped, hash already registered");
        }

        Ok(row.map(Self::map_row).transpose()?)
    }

    async fn append_thumb(&self, uuid: Uuid, width: u32) -> Result<bool> {
        let width = i32::try_from(width).unwrap_or(i32::MAX);
        let result = sqlx::query(
            r#"
            UPDATE images
            SET meta = jsonb_set(
                    meta,
                    '{thumbs}',
                    (
                        SELECT COALESCE(jsonb_agg(w ORDER BY w), '[]'::jsonb)
                        FROM (
                            SELECT jsonb_array_elements(meta -> 'thumbs')::int AS w
                            UNION
                            SELECT $2::int
                        ) widths
                    )
                ),
                updated_at = NOW()
            WHERE uuid = $1
              AND NOT (meta -> 'thumbs') @> jsonb_build_array($2::int)
            "#,
        )
        .bind(uuid)
        .bind(width)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list(&self, params: &ImageListParams) -> Result<Vec<ImageRecord>> {
        // Column and direction come from a closed set, never from raw input.
        let direction = if params.sort_desc { "DESC" } else { "ASC" };
        let rows = sqlx::query(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images ORDER BY {} {direction}, id {direction} LIMIT $1 OFFSET $2",
            params.sort_by.column()
        ))
        .bind(i64::from(params.page_size))
        .bind(params.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(Self::map_row)
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?)
    }

    async fn count(&self) -> Result<i64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }
}
