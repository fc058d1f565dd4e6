//! Prometheus metrics for image-service

use actix_web::HttpResponse;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;
use tracing::warn;

static METRICS: OnceLock<ImageMetricsInner> = OnceLock::new();

struct ImageMetricsInner {
    thumbnail_requests: IntCounterVec,
    generations: IntCounterVec,
    uploads: IntCounterVec,
}

impl ImageMetricsInner {
    fn new() -> Self {
        Self {
            thumbnail_requests: IntCounterVec::new(
                Opts::new(
                    "image_thumbnail_requests_total",
                    "Image requests by the file that was served",
                ),
                &["path"],
            )
            .expect("valid metric definition"),
            generations: IntCounterVec::new(
                Opts::new(
                    "image_thumbnail_generations_total",
                    "Thumbnail task messages handled by this process",
                ),
                &["outcome"],
            )
            .expect("valid metric definition"),
            uploads: IntCounterVec::new(
                Opts::new("image_uploads_total", "Image uploads by result"),
                &["result"],
            )
            .expect("valid metric definition"),
        }
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.thumbnail_requests.clone()))?;
        registry.register(Box::new(self.generations.clone()))?;
        registry.register(Box::new(self.uploads.clone()))?;
        Ok(())
    }
}

fn get_metrics() -> &'static ImageMetricsInner {
    METRICS.get_or_init(|| {
        let inner = ImageMetricsInner::new();
        if let Err(e) = inner.register(prometheus::default_registry()) {
            warn!(error = %e, "Failed to register image metrics");
        }
        inner
    })
}

/// `path` is original | cached | generated | fallback
pub fn record_image_request(path: &str) {
    get_metrics()
        .thumbnail_requests
        .with_label_values(&[path])
        .inc();
}

/// `outcome` is success | skipped | failed
pub fn record_generation(outcome: &str) {
    get_metrics()
        .generations
        .with_label_values(&[outcome])
        .inc();
}

/// `result` is created | duplicate | rejected
pub fn record_upload(result: &str) {
    get_metrics().uploads.with_label_values(&[result]).inc();
}

/// GET /metrics
pub async fn metrics_handler() -> HttpResponse {
    // Registers the service counters on first scrape.
    get_metrics();

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&prometheus::gather(), &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
