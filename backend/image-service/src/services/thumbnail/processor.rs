//! Thumbnail processor - probes uploads and renders JPEG thumbnails
//!
//! Resizes an original to a target width while keeping its aspect ratio
//! and encodes the result as JPEG with configurable quality.
//!
//! Uses `spawn_blocking` for CPU-intensive operations to avoid blocking the async runtime.

use crate::error::{AppError, Result};
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageOutputFormat};
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// Configuration for thumbnail generation
#[derive(Clone, Debug)]
pub struct ThumbnailConfig {
    /// JPEG quality (1-100)
    pub quality: u8,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self { quality: 75 }
    }
}

/// Format and dimensions read from an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// png, jpg or webp
    pub format: String,
    pub width: u32,
    pub height: u32,
}

/// Result of thumbnail generation
#[derive(Debug)]
pub struct ThumbnailResult {
    /// The thumbnail image data as JPEG
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Thumbnail processor
pub struct ThumbnailProcessor {
    config: ThumbnailConfig,
}

impl ThumbnailProcessor {
    pub fn new(config: ThumbnailConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ThumbnailConfig::default())
    }

    /// Identify an upload. Anything other than PNG, JPEG or WebP is rejected.
    pub fn probe(&self, data: &[u8]) -> Result<ImageInfo> {
        let format = image::guess_format(data)
            .map_err(|_| AppError::BadRequest("Unrecognized image data".to_string()))?;

        let extension = match format {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::WebP => "webp",
            other => {
                return Err(AppError::BadRequest(format!(
                    "Unsupported image format: {other:?}"
                )))
            }
        };

        let (width, height) = image::io::Reader::with_format(Cursor::new(data), format)
            .into_dimensions()
            .map_err(|e| AppError::BadRequest(format!("Unable to read image header: {e}")))?;

        if width == 0 || height == 0 {
            return Err(AppError::BadRequest("Image has no pixels".to_string()));
        }

        Ok(ImageInfo {
            format: extension.to_string(),
            width,
            height,
        })
    }

    /// Render one thumbnail of `width` pixels (blocking version)
    ///
    /// **Note:** This method performs CPU-intensive operations and should not be called
    /// directly from async code. Use `generate_async` instead.
    pub fn generate(&self, original_data: &[u8], width: u32) -> Result<ThumbnailResult> {
        let img = Self::decode(original_data)?;
        self.render(&img, width)
    }

    /// Decode once and render every width in `widths` (blocking version)
    pub fn generate_ladder(
        &self,
        original_data: &[u8],
        widths: &[u32],
    ) -> Result<Vec<ThumbnailResult>> {
        if widths.is_empty() {
            return Ok(Vec::new());
        }
        let img = Self::decode(original_data)?;
        widths.iter().map(|w| self.render(&img, *w)).collect()
    }

    /// Generate a thumbnail asynchronously using a blocking thread pool
    pub async fn generate_async(
        self: Arc<Self>,
        original_data: Bytes,
        width: u32,
    ) -> Result<ThumbnailResult> {
        tokio::task::spawn_blocking(move || self.generate(&original_data, width))
            .await
            .map_err(|e| AppError::Internal(format!("Thumbnail task panicked: {e}")))?
    }

    pub async fn generate_ladder_async(
        self: Arc<Self>,
        original_data: Bytes,
        widths: Vec<u32>,
    ) -> Result<Vec<ThumbnailResult>> {
        tokio::task::spawn_blocking(move || self.generate_ladder(&original_data, &widths))
            .await
            .map_err(|e| AppError::Internal(format!("Thumbnail task panicked: {e}")))?
    }

    fn decode(data: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(data)
            .map_err(|e| AppError::CodecError(format!("Failed to decode image: {e}")))
    }

    fn render(&self, img: &DynamicImage, width: u32) -> Result<ThumbnailResult> {
        let (orig_w, orig_h) = img.dimensions();
        let (new_w, new_h) = Self::calculate_dimensions(orig_w, orig_h, width);

        let resized = img.resize_exact(new_w, new_h, FilterType::Triangle);
        let data = self.encode_jpeg(&resized)?;

        debug!(
            original_width = orig_w,
            width = new_w,
            height = new_h,
            size = data.len(),
            "Thumbnail generated"
        );

        Ok(ThumbnailResult {
            data,
            width: new_w,
            height: new_h,
        })
    }

    /// Height follows the aspect ratio of the original
    fn calculate_dimensions(width: u32, height: u32, target_width: u32) -> (u32, u32) {
        let target_width = target_width.max(1);
        let ratio = target_width as f64 / width.max(1) as f64;
        let target_height = ((height as f64) * ratio).round().max(1.0) as u32;
        (target_width, target_height)
    }

    /// Encode image as JPEG. Alpha is dropped since JPEG has no alpha channel.
    fn encode_jpeg(&self, img: &DynamicImage) -> Result<Bytes> {
        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        let mut buf = Vec::new();
        let mut cursor = Cursor::new(&mut buf);

        rgb.write_to(&mut cursor, ImageOutputFormat::Jpeg(self.config.quality))
            .map_err(|e| AppError::CodecError(format!("Failed to encode JPEG: {e}")))?;

        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba};

    fn sample(width: u32, height: u32, format: ImageOutputFormat) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([(x % 255) as u8, (y % 255) as u8, 128, 200])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), format)
            .unwrap();
        buf
    }

    #[test]
    fn test_calculate_dimensions() {
        assert_eq!(ThumbnailProcessor::calculate_dimensions(1000, 500, 256), (256, 128));
        assert_eq!(ThumbnailProcessor::calculate_dimensions(500, 1000, 64), (64, 128));
        assert_eq!(ThumbnailProcessor::calculate_dimensions(1000, 1, 32), (32, 1));
    }

    #[test]
    fn test_probe_png() {
        let processor = ThumbnailProcessor::with_defaults();
        let info = processor.probe(&sample(120, 80, ImageOutputFormat::Png)).unwrap();
        assert_eq!(
            info,
            ImageInfo {
                format: "png".to_string(),
                width: 120,
                height: 80
            }
        );
    }

    #[test]
    fn test_probe_normalizes_jpeg() {
        let processor = ThumbnailProcessor::with_defaults();
        let jpeg = processor.generate(&sample(64, 64, ImageOutputFormat::Png), 64).unwrap();
        assert_eq!(processor.probe(&jpeg.data).unwrap().format, "jpg");
    }

    #[test]
    fn test_probe_rejects_garbage_and_bmp() {
        let processor = ThumbnailProcessor::with_defaults();
        assert!(matches!(
            processor.probe(b"definitely not an image"),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            processor.probe(&sample(8, 8, ImageOutputFormat::Bmp)),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_generate_keeps_aspect_ratio_and_drops_alpha() {
        let processor = ThumbnailProcessor::with_defaults();
        let result = processor
            .generate(&sample(400, 200, ImageOutputFormat::Png), 128)
            .unwrap();
        assert_eq!((result.width, result.height), (128, 64));

        let decoded = image::load_from_memory(&result.data).unwrap();
        assert_eq!(decoded.dimensions(), (128, 64));
        assert_eq!(image::guess_format(&result.data).unwrap(), ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_generate_ladder_async() {
        let processor = Arc::new(ThumbnailProcessor::with_defaults());
        let results = processor
            .generate_ladder_async(
                Bytes::from(sample(300, 150, ImageOutputFormat::Png)),
                vec![32, 64, 128, 256],
            )
            .await
            .unwrap();
        let widths: Vec<u32> = results.iter().map(|r| r.width).collect();
        assert_eq!(widths, vec![32, 64, 128, 256]);
    }
}
