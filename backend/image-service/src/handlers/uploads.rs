/// Upload handlers - admin endpoints for ingesting and listing images
use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use bytes::BytesMut;
use futures::StreamExt;

use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{ImageListQuery, ImageListResponse, ImageListRow, ImageResponse};
use crate::services::ImageServices;

const ACCEPTED_MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

fn rejected(err: AppError) -> AppError {
    metrics::record_upload("rejected");
    err
}

/// Upload an image
///
/// Reads the first file field of the multipart body. Responds 201 for a new
/// image and 208 when identical bytes were uploaded before.
pub async fn upload_image(
    services: web::Data<ImageServices>,
    mut payload: Multipart,
) -> Result<HttpResponse> {
    let limit = services.upload_max_bytes;
    let mut file: Option<BytesMut> = None;

    while let Some(item) = payload.next().await {
        let mut field = item
            .map_err(|e| rejected(AppError::BadRequest(format!("Malformed multipart body: {e}"))))?;

        let is_file = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .is_some();

        if !is_file || file.is_some() {
            // Drain fields we do not use so the body keeps flowing.
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| rejected(AppError::BadRequest(format!("Error reading field: {e}"))))?;
            }
            continue;
        }

        let mime = field.content_type().map(|m| m.essence_str().to_string());
        if !mime
            .as_deref()
            .is_some_and(|m| ACCEPTED_MIME_TYPES.contains(&m))
        {
            return Err(rejected(AppError::BadRequest(format!(
                "Unsupported file type: {}",
                mime.as_deref().unwrap_or("unknown")
            ))));
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk
                .map_err(|e| rejected(AppError::BadRequest(format!("Error reading upload: {e}"))))?;
            if buf.len() + chunk.len() > limit {
                return Err(rejected(AppError::PayloadTooLarge(format!(
                    "Upload exceeds {limit} bytes"
                ))));
            }
            buf.extend_from_slice(&chunk);
        }
        file = Some(buf);
    }

    let data = file
        .ok_or_else(|| rejected(AppError::BadRequest("No file in request".to_string())))?
        .freeze();

    let outcome = services.ingest.ingest(data).await.map_err(|e| match e {
        AppError::BadRequest(_) => rejected(e),
        other => other,
    })?;

    let created = outcome.is_created();
    metrics::record_upload(if created { "created" } else { "duplicate" });

    let body = ImageResponse::from(outcome.into_record());
    if created {
        Ok(HttpResponse::Created().json(body))
    } else {
        Ok(HttpResponse::build(StatusCode::ALREADY_REPORTED).json(body))
    }
}

/// List images for the admin panel
pub async fn list_images(
    services: web::Data<ImageServices>,
    query: web::Query<ImageListQuery>,
) -> Result<HttpResponse> {
    let params = query.validate()?;

    let (records, total_rows) = tokio::try_join!(
        services.registry.list(&params),
        services.registry.count()
    )?;

    Ok(HttpResponse::Ok().json(ImageListResponse {
        page: params.page,
        page_size: params.page_size,
        rows: records.into_iter().map(ImageListRow::from).collect(),
        total_rows,
    }))
}
