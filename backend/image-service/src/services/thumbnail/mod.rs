//! On-demand thumbnail generation
//!
//! This module provides:
//! - Width quantization onto the power-of-two ladder
//! - Image processor for probing, resizing and JPEG encoding
//! - Coordinator that serves `/image/{uuid}[:size]` and dispatches missing sizes
//! - Worker that listens on the preview channels and generates thumbnails

pub mod coordinator;
pub mod processor;
pub mod service;
pub mod sizing;
pub mod waiters;
pub mod worker;

pub use coordinator::ThumbnailCoordinator;
pub use processor::{ImageInfo, ThumbnailConfig, ThumbnailProcessor, ThumbnailResult};
pub use service::{GenerateOutcome, ThumbnailGenerator};
pub use sizing::{quantize_width, thumbnail_ladder};
pub use waiters::WaiterRegistry;
pub use worker::{TaskOutcome, ThumbnailWorker};

use crate::config::ImageConfig;
use std::time::Duration;

/// Tunables shared by the coordinator, the worker and ingestion
#[derive(Clone, Debug)]
pub struct ThumbnailSettings {
    pub min_log2: u32,
    pub wait_timeout: Duration,
    pub meta_cache_ttl: Duration,
    pub task_ttl: Duration,
    pub jpeg_quality: u8,
    /// Whether this process generates thumbnails for dispatched tasks
    pub generate_enabled: bool,
}

impl From<&ImageConfig> for ThumbnailSettings {
    fn from(config: &ImageConfig) -> Self {
        Self {
            min_log2: config.min_preview_log_size,
            wait_timeout: config.preview_wait_timeout(),
            meta_cache_ttl: config.meta_cache_ttl(),
            task_ttl: config.task_ttl(),
            jpeg_quality: config.jpeg_quality,
            generate_enabled: config.enable_preview_task,
        }
    }
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self::from(&ImageConfig::default())
    }
}

impl ThumbnailSettings {
    /// Smallest width on the ladder
    pub fn min_width(&self) -> u32 {
        1u32 << self.min_log2.min(31)
    }
}
