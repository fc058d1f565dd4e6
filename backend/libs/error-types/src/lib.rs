//! Shared JSON error envelope for HTTP services.
//!
//! Every service renders its errors through [`ErrorResponse`] so clients can
//! route on `error_type` and localize on `code` without caring which service
//! produced the failure.

use serde::{Deserialize, Serialize};

/// API error body returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short reason phrase ("Not Found", "Bad Request", ...)
    pub error: String,

    /// Human readable message
    pub message: String,

    /// HTTP status code
    pub status: u16,

    /// Error category, one of the [`error_types`] constants
    pub error_type: String,

    /// Stable machine code, one of the [`error_codes`] constants
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// RFC 3339 timestamp
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, status: u16, error_type: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            status,
            error_type: error_type.to_string(),
            code: code.to_string(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}

/// Stable error codes
pub mod error_codes {
    // Images
    pub const IMAGE_NOT_FOUND: &str = "IMAGE_NOT_FOUND";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const UNSUPPORTED_FORMAT: &str = "UNSUPPORTED_FORMAT";
    pub const UPLOAD_TOO_LARGE: &str = "UPLOAD_TOO_LARGE";
    pub const MEDIA_PROCESSING_FAILED: &str = "MEDIA_PROCESSING_FAILED";

    // Database/System
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const CACHE_ERROR: &str = "CACHE_ERROR";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const INTERNAL_SERVER_ERROR: &str = "INTERNAL_SERVER_ERROR";
}

/// Error categories
pub mod error_types {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const NOT_FOUND_ERROR: &str = "not_found_error";
    pub const PAYLOAD_ERROR: &str = "payload_error";
    pub const SERVER_ERROR: &str = "server_error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_creation() {
        let error = ErrorResponse::new(
            "Not Found",
            "Image not found",
            404,
            error_types::NOT_FOUND_ERROR,
            error_codes::IMAGE_NOT_FOUND,
        );

        assert_eq!(error.status, 404);
        assert_eq!(error.error_type, error_types::NOT_FOUND_ERROR);
        assert_eq!(error.code, error_codes::IMAGE_NOT_FOUND);
        assert!(error.details.is_none());
    }

    #[test]
    fn test_optional_fields_skipped_when_empty() {
        let error = ErrorResponse::new(
            "Bad Request",
            "Unsupported image format",
            400,
            error_types::VALIDATION_ERROR,
            error_codes::UNSUPPORTED_FORMAT,
        );
        let json = serde_json::to_value(&error).unwrap();

        assert!(json.get("details").is_none());

        let json = serde_json::to_value(error.with_details("gif".into())).unwrap();
        assert_eq!(json["details"], "gif");
    }
}
