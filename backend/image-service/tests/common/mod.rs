//! Shared fixtures for image-service integration tests
//!
//! `MemoryCache` and `MemoryRegistry` implement the cache and registry traits
//! in-process, so several `ImageServices` instances sharing them behave like
//! separate processes sharing Redis and PostgreSQL.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Rgb};
use image_service::cache::{
    worker_lease_key, MessageStream, PreviewCache, PreviewMessage, TaskState,
    IDLE_SENTINEL, PREVIEW_TASK_CHANNEL,
};
use image_service::config::ImageConfig;
use image_service::db::ImageRegistry;
use image_service::error::{AppError, Result};
use image_service::models::{
    CachedImage, ImageListParams, ImageLocation, ImageMeta, ImageRecord, ImageSortField,
    NewImage, ThumbnailTask,
};
use image_service::services::{ImageServices, ImageStorage};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

// ========================================
// Cache fake
// ========================================

pub struct MemoryCache {
    images: Mutex<HashMap<Uuid, CachedImage>>,
    keys: Mutex<HashMap<String, String>>,
    bus: broadcast::Sender<PreviewMessage>,
    /// Successful `claim_task` calls
    pub claims: AtomicUsize,
    pub invalidations: AtomicUsize,
    /// Swallow task messages, as if no generator were running anywhere
    pub drop_task_messages: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Arc<Self> {
        let (bus, _) = broadcast::channel(256);
        Arc::new(Self {
            images: Mutex::new(HashMap::new()),
            keys: Mutex::new(HashMap::new()),
            bus,
            claims: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
            drop_task_messages: AtomicBool::new(false),
        })
    }

    pub fn claims(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    pub fn raw_key(&self, key: &str) -> Option<String> {
        self.keys.lock().unwrap().get(key).cloned()
    }

    pub fn cached_image(&self, uuid: Uuid) -> Option<CachedImage> {
        self.images.lock().unwrap().get(&uuid).cloned()
    }

    /// Listen on the bus directly, bypassing channel filtering
    pub fn tap(&self) -> broadcast::Receiver<PreviewMessage> {
        self.bus.subscribe()
    }
}

#[async_trait]
impl PreviewCache for MemoryCache {
    async fn get_image(&self, uuid: Uuid) -> Result<Option<CachedImage>> {
        Ok(self.images.lock().unwrap().get(&uuid).cloned())
    }

    async fn put_image(&self, uuid: Uuid, image: &CachedImage, _ttl: Duration) -> Result<()> {
        self.images.lock().unwrap().insert(uuid, image.clone());
        Ok(())
    }

    async fn invalidate_image(&self, uuid: Uuid) -> Result<()> {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.images.lock().unwrap().remove(&uuid);
        Ok(())
    }

    async fn claim_task(&self, key: &str, _ttl: Duration) -> Result<bool> {
        let mut keys = self.keys.lock().unwrap();
        if keys.contains_key(key) {
            return Ok(false);
        }
        keys.insert(key.to_string(), IDLE_SENTINEL.to_string());
        self.claims.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn dispatch_task(&self, key: &str, task: &ThumbnailTask, _ttl: Duration) -> Result<()> {
        let body = serde_json::to_string(task)?;
        self.keys.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    async fn get_task(&self, key: &str) -> Result<TaskState> {
        Ok(match self.keys.lock().unwrap().get(key) {
            None => TaskState::Absent,
            Some(raw) if raw == IDLE_SENTINEL => TaskState::Idle,
            Some(raw) => TaskState::Dispatched(serde_json::from_str(raw)?),
        })
    }

    async fn delete_task(&self, key: &str) -> Result<()> {
        self.keys.lock().unwrap().remove(key);
        Ok(())
    }

    async fn acquire_worker_lease(&self, task_key: &str, _ttl: Duration) -> Result<bool> {
        let mut keys = self.keys.lock().unwrap();
        let lease = worker_lease_key(task_key);
        if keys.contains_key(&lease) {
            return Ok(false);
        }
        keys.insert(lease, "1".to_string());
        Ok(true)
    }

    async fn release_worker_lease(&self, task_key: &str) -> Result<()> {
        self.keys.lock().unwrap().remove(&worker_lease_key(task_key));
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        if channel == PREVIEW_TASK_CHANNEL && self.drop_task_messages.load(Ordering::SeqCst) {
            return Ok(());
        }
        // No subscribers is not an error, same as PUBLISH returning 0.
        let _ = self.bus.send(PreviewMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<MessageStream> {
        let channels: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
        let rx = self.bus.subscribe();

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(message) => return Some((message, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .filter(move |message| futures::future::ready(channels.contains(&message.channel)));

        Ok(stream.boxed())
    }
}

/// Wraps a `MemoryCache` and overrides selected replies, for driving
/// interleavings the plain fake never produces on its own
pub struct ScriptedCache {
    pub inner: Arc<MemoryCache>,
    /// `claim_task` reports the key as already taken
    pub claim_taken: AtomicBool,
    /// `get_task` reports the key as absent
    pub task_absent: AtomicBool,
    /// `publish` on the task channel fails
    pub fail_task_publish: AtomicBool,
}

impl ScriptedCache {
    pub fn new(inner: Arc<MemoryCache>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            claim_taken: AtomicBool::new(false),
            task_absent: AtomicBool::new(false),
            fail_task_publish: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl PreviewCache for ScriptedCache {
    async fn get_image(&self, uuid: Uuid) -> Result<Option<CachedImage>> {
        self.inner.get_image(uuid).await
    }

    async fn put_image(&self, uuid: Uuid, image: &CachedImage, ttl: Duration) -> Result<()> {
        self.inner.put_image(uuid, image, ttl).await
    }

    async fn invalidate_image(&self, uuid: Uuid) -> Result<()> {
        self.inner.invalidate_image(uuid).await
    }

    async fn claim_task(&self, key: &str, ttl: Duration) -> Result<bool> {
        if self.claim_taken.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.claim_task(key, ttl).await
    }

    async fn dispatch_task(&self, key: &str, task: &ThumbnailTask, ttl: Duration) -> Result<()> {
        self.inner.dispatch_task(key, task, ttl).await
    }

    async fn get_task(&self, key: &str) -> Result<TaskState> {
        if self.task_absent.load(Ordering::SeqCst) {
            return Ok(TaskState::Absent);
        }
        self.inner.get_task(key).await
    }

    async fn delete_task(&self, key: &str) -> Result<()> {
        self.inner.delete_task(key).await
    }

    async fn acquire_worker_lease(&self, task_key: &str, ttl: Duration) -> Result<bool> {
        self.inner.acquire_worker_lease(task_key, ttl).await
    }

    async fn release_worker_lease(&self, task_key: &str) -> Result<()> {
        self.inner.release_worker_lease(task_key).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        if channel == PREVIEW_TASK_CHANNEL && self.fail_task_publish.load(Ordering::SeqCst) {
            return Err(AppError::CacheError("publish refused".to_string()));
        }
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<MessageStream> {
        self.inner.subscribe(channels).await
    }
}

// ========================================
// Registry fake
// ========================================

#[derive(Default)]
pub struct MemoryRegistry {
    records: Mutex<Vec<ImageRecord>>,
    next_id: AtomicI64,
    /// Every successful `append_thumb`
    appends: Mutex<Vec<(Uuid, u32)>>,
}

impl MemoryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn appends_for(&self, uuid: Uuid, width: u32) -> usize {
        self.appends
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, w)| *u == uuid && *w == width)
            .count()
    }

    pub fn get(&self, uuid: Uuid) -> Option<ImageRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.uuid == uuid)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageRegistry for MemoryRegistry {
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<ImageRecord>> {
        Ok(self.get(uuid))
    }

    async fn find_by_sha256(&self, sha256: &str) -> Result<Option<ImageRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.sha256 == sha256)
            .cloned())
    }

    async fn insert(&self, image: NewImage) -> Result<Option<ImageRecord>> {
        let mut records = self.records.lock().unwrap();
        if records.iter().any(|r| r.sha256 == image.sha256) {
            return Ok(None);
        }
        let now = Utc::now();
        let record = ImageRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            uuid: image.uuid,
            sha256: image.sha256,
            location: image.location,
            path: image.path,
            meta: image.meta,
            created_at: now,
            updated_at: now,
        };
        records.push(record.clone());
        Ok(Some(record))
    }

    async fn append_thumb(&self, uuid: Uuid, width: u32) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.iter_mut().find(|r| r.uuid == uuid) else {
            return Ok(false);
        };
        if record.meta.thumbs.contains(&width) {
            return Ok(false);
        }
        record.meta.thumbs.push(width);
        record.meta.thumbs.sort_unstable();
        record.updated_at = Utc::now();
        self.appends.lock().unwrap().push((uuid, width));
        Ok(true)
    }

    async fn list(&self, params: &ImageListParams) -> Result<Vec<ImageRecord>> {
        let mut records = self.records.lock().unwrap().clone();
        records.sort_by(|a, b| match params.sort_by {
            ImageSortField::Id => a.id.cmp(&b.id),
            ImageSortField::Sha256 => a.sha256.cmp(&b.sha256),
            ImageSortField::CreatedAt => a.created_at.cmp(&b.created_at),
        });
        if params.sort_desc {
            records.reverse();
        }
        Ok(records
            .into_iter()
            .skip(params.offset() as usize)
            .take(params.page_size as usize)
            .collect())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.records.lock().unwrap().len() as i64)
    }
}

// ========================================
// Images and nodes
// ========================================

/// Encode a gradient image of the given size
pub fn sample_image(width: u32, height: u32, format: ImageOutputFormat) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), format)
        .unwrap();
    buf
}

pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    sample_image(width, height, ImageOutputFormat::Png)
}

/// Image config rooted in `dir` with a generous wait window
pub fn test_config(dir: &Path) -> ImageConfig {
    ImageConfig {
        dir: dir.join("images"),
        temp_dir: dir.join("temp"),
        preview_wait_timeout_ms: 10_000,
        ..ImageConfig::default()
    }
}

/// Register a PNG original with the given thumbnail list, bypassing ingestion
pub async fn seed_image(
    registry: &MemoryRegistry,
    config: &ImageConfig,
    original: &[u8],
    width: u32,
    height: u32,
    thumbs: Vec<u32>,
) -> ImageRecord {
    let uuid = Uuid::new_v4();
    let path = ImageStorage::relative_dir(Utc::now(), uuid);
    let storage = ImageStorage::new(&config.dir, &config.temp_dir);
    storage
        .write_atomic(&storage.original_path(&path, "png"), original)
        .await
        .unwrap();

    registry
        .insert(NewImage {
            uuid,
            sha256: format!("{:064x}", uuid.as_u128()),
            location: ImageLocation::Local,
            path,
            meta: ImageMeta {
                format: "png".to_string(),
                width,
                height,
                size: original.len() as u64,
                thumbs,
            },
        })
        .await
        .unwrap()
        .unwrap()
}

/// One simulated process: services plus its running listener
pub struct Node {
    pub services: ImageServices,
    listener: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl Node {
    pub async fn start(
        config: &ImageConfig,
        registry: Arc<MemoryRegistry>,
        cache: Arc<MemoryCache>,
    ) -> Self {
        let services = ImageServices::new(config, registry, cache);
        let (shutdown, rx) = watch::channel(false);
        let listener = services.worker.clone().start(rx).await.unwrap();
        Self {
            services,
            listener,
            shutdown,
        }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.listener.await;
    }
}
