//! Image Service
//!
//! Serves stored images and power-of-two JPEG thumbnails, generating each
//! missing thumbnail once across every process that shares the Redis cache.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;

// Public re-exports
pub use config::Config;
pub use error::{AppError, Result};
