/// Image handlers - serve originals and thumbnails
use actix_web::http::header;
use actix_web::{web, HttpResponse};

use crate::error::Result;
use crate::metrics;
use crate::services::ImageServices;

const THUMBNAIL_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// GET /image/{uuid} and GET /image/{uuid}:{size}
pub async fn get_image(
    services: web::Data<ImageServices>,
    param: web::Path<String>,
) -> Result<HttpResponse> {
    let resolved = services.coordinator.resolve_image(&param).await?;
    metrics::record_image_request(resolved.variant.as_str());

    let mut response = HttpResponse::Ok();
    response.content_type(resolved.content_type);
    // Thumbnail bytes never change for a given (uuid, width).
    if resolved.variant.is_thumbnail() {
        response.insert_header((header::CACHE_CONTROL, THUMBNAIL_CACHE_CONTROL));
    }

    Ok(response.body(resolved.bytes))
}
