/// HTTP handlers for image-service
///
/// This module contains handlers for:
/// - Images: serve originals and on-demand thumbnails
/// - Uploads: admin upload and listing
use actix_web::{web, HttpResponse};

use crate::metrics;

pub mod images;
pub mod uploads;

pub use images::get_image;
pub use uploads::{list_images, upload_image};

/// Register every route of the service
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/api/v1/health",
        web::get().to(|| async { HttpResponse::Ok().json(serde_json::json!({"status": "ok"})) }),
    )
    .route(
        "/api/v1/health/ready",
        web::get().to(|| async { HttpResponse::Ok().finish() }),
    )
    .route(
        "/api/v1/health/live",
        web::get().to(|| async { HttpResponse::Ok().finish() }),
    )
    .route("/metrics", web::get().to(metrics::metrics_handler))
    .route("/image/{param}", web::get().to(get_image))
    .service(
        web::scope("/api/admin/image")
            .route("/upload", web::post().to(upload_image))
            .route("/list", web::get().to(list_images)),
    );
}
