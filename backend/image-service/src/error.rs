/// Error types for Image Service
///
/// Only `NotFound`, `BadRequest` and `PayloadTooLarge` are expected to reach
/// clients of the image endpoints. Storage, codec and cache failures on the
/// thumbnail path are absorbed by the coordinator and the worker.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use error_types::{error_codes, error_types as kinds, ErrorResponse};
use thiserror::Error;

/// Result type for image-service operations
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// No image record for the requested uuid
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed uuid parameter or unsupported upload
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Upload exceeds the configured size limit
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    /// Filesystem read/write failure
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Decode, resize or encode failure
    #[error("Codec error: {0}")]
    CodecError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn kind_and_code(&self) -> (&'static str, &'static str) {
        match self {
            AppError::NotFound(_) => (kinds::NOT_FOUND_ERROR, error_codes::IMAGE_NOT_FOUND),
            AppError::BadRequest(_) => (kinds::VALIDATION_ERROR, error_codes::INVALID_REQUEST),
            AppError::PayloadTooLarge(_) => (kinds::PAYLOAD_ERROR, error_codes::UPLOAD_TOO_LARGE),
            AppError::DatabaseError(_) => (kinds::SERVER_ERROR, error_codes::DATABASE_ERROR),
            AppError::CacheError(_) => (kinds::SERVER_ERROR, error_codes::CACHE_ERROR),
            AppError::StorageError(_) => (kinds::SERVER_ERROR, error_codes::STORAGE_ERROR),
            AppError::CodecError(_) => {
                (kinds::SERVER_ERROR, error_codes::MEDIA_PROCESSING_FAILED)
            }
            AppError::Internal(_) => (kinds::SERVER_ERROR, error_codes::INTERNAL_SERVER_ERROR),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::DatabaseError(_)
            | AppError::CacheError(_)
            | AppError::StorageError(_)
            | AppError::CodecError(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let (error_type, code) = self.kind_and_code();

        let response = ErrorResponse::new(
            status.canonical_reason().unwrap_or("Error"),
            &self.to_string(),
            status.as_u16(),
            error_type,
            code,
        );

        HttpResponse::build(status).json(response)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::StorageError(err.to_string())
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::CodecError(err.to_string())
    }
}
