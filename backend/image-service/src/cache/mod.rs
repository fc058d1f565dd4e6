/// Caching layer for image-service
///
/// This module handles:
/// - Image metadata caching (`db:image:uuid:<uuid>` hashes)
/// - Thumbnail task claims and worker leases
/// - The preview task/done pub/sub channels
use crate::error::{AppError, Result};
use crate::models::{CachedImage, ThumbnailTask};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use redis_utils::{RedisPool, SharedConnectionManager};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Channel carrying task keys that need a generator
pub const PREVIEW_TASK_CHANNEL: &str = "create_image_preview_task";
/// Channel carrying task keys whose thumbnail has been written
pub const PREVIEW_DONE_CHANNEL: &str = "create_image_preview_done";
/// Task key value between claim and dispatch
pub const IDLE_SENTINEL: &str = "idle";

const TASK_KEY_PREFIX: &str = "task:create_image_preview:";

pub fn image_meta_key(uuid: Uuid) -> String {
    format!("db:image:uuid:{uuid}")
}

pub fn preview_task_key(uuid: Uuid, size: u32) -> String {
    format!("{TASK_KEY_PREFIX}{uuid}:{size}")
}

/// `lock:create_image_preview:<uuid>:<size>` for a given task key
pub fn worker_lease_key(task_key: &str) -> String {
    format!(
        "lock:{}",
        task_key.strip_prefix("task:").unwrap_or(task_key)
    )
}

/// Split a task key back into its uuid and width
pub fn parse_task_key(key: &str) -> Option<(Uuid, u32)> {
    let rest = key.strip_prefix(TASK_KEY_PREFIX)?;
    let (uuid, size) = rest.rsplit_once(':')?;
    Some((Uuid::parse_str(uuid).ok()?, size.parse().ok()?))
}

/// Value currently held by a task key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Absent,
    /// Claimed, body not written yet
    Idle,
    Dispatched(ThumbnailTask),
}

/// A message received on one of the preview channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewMessage {
    pub channel: String,
    pub payload: String,
}

pub type MessageStream = BoxStream<'static, PreviewMessage>;

/// Shared cache primitives used by the thumbnail protocol.
///
/// Every implementation must make `claim_task` and `acquire_worker_lease`
/// atomic across processes.
#[async_trait]
pub trait PreviewCache: Send + Sync {
    async fn get_image(&self, uuid: Uuid) -> Result<Option<CachedImage>>;

    async fn put_image(&self, uuid: Uuid, image: &CachedImage, ttl: Duration) -> Result<()>;

    async fn invalidate_image(&self, uuid: Uuid) -> Result<()>;

    /// Set the task key to the idle sentinel if it does not exist.
    /// Returns true when this caller now owns the dispatch.
    async fn claim_task(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Overwrite a claimed key with the task body
    async fn dispatch_task(&self, key: &str, task: &ThumbnailTask, ttl: Duration) -> Result<()>;

    async fn get_task(&self, key: &str) -> Result<TaskState>;

    async fn delete_task(&self, key: &str) -> Result<()>;

    /// Take the generator lease for a task key. Returns false if another
    /// process holds it.
    async fn acquire_worker_lease(&self, task_key: &str, ttl: Duration) -> Result<bool>;

    async fn release_worker_lease(&self, task_key: &str) -> Result<()>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Stream of messages from `channels`. Ends when the underlying
    /// connection is lost.
    async fn subscribe(&self, channels: &[&str]) -> Result<MessageStream>;
}

/// Redis-backed implementation of [`PreviewCache`]
#[derive(Clone)]
pub struct RedisPreviewCache {
    conn: SharedConnectionManager,
    pool: RedisPool,
}

impl RedisPreviewCache {
    pub fn new(pool: &RedisPool) -> Self {
        Self {
            conn: pool.manager(),
            pool: pool.clone(),
        }
    }

    async fn connection(&self) -> ConnectionManager {
        self.conn.lock().await.clone()
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let ttl = usize::try_from(ttl.as_secs().max(1))
            .map_err(|_| AppError::CacheError("TTL exceeds usize::MAX".to_string()))?;

        let mut conn = self.connection().await;
        let was_set: bool = conn
            .set_options(
                key,
                value,
                redis::SetOptions::default()
                    .conditional_set(redis::ExistenceCheck::NX)
                    .with_expiration(redis::SetExpiry::EX(ttl)),
            )
            .await
            .map_err(|e| AppError::CacheError(format!("SET NX {key} failed: {e}")))?;

        Ok(was_set)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await;
        conn.del(key)
            .await
            .map(|_: usize| ())
            .map_err(|e| AppError::CacheError(format!("Failed to delete cache key {key}: {e}")))
    }
}

#[async_trait]
impl PreviewCache for RedisPreviewCache {
    async fn get_image(&self, uuid: Uuid) -> Result<Option<CachedImage>> {
        let key = image_meta_key(uuid);
        let mut conn = self.connection().await;
        let fields: HashMap<String, String> = conn
            .hgetall(&key)
            .await
            .map_err(|e| AppError::CacheError(format!("Failed to read {key}: {e}")))?;

        if fields.is_empty() {
            return Ok(None);
        }

        let cached = CachedImage::from_fields(&fields);
        if cached.is_none() {
            warn!(%key, "Ignoring malformed image metadata hash");
        }
        Ok(cached)
    }

    async fn put_image(&self, uuid: Uuid, image: &CachedImage, ttl: Duration) -> Result<()> {
        let key = image_meta_key(uuid);
        let fields = image.to_fields()?;

        let mut conn = self.connection().await;
        redis::pipe()
            .atomic()
            .hset_multiple(&key, fields.as_slice())
            .ignore()
            .expire(&key, ttl.as_secs() as i64)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::CacheError(format!("Failed to write {key}: {e}")))
    }

    async fn invalidate_image(&self, uuid: Uuid) -> Result<()> {
        self.delete(&image_meta_key(uuid)).await
    }

    async fn claim_task(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.set_if_absent(key, IDLE_SENTINEL, ttl).await
    }

    async fn dispatch_task(&self, key: &str, task: &ThumbnailTask, ttl: Duration) -> Result<()> {
        let body = serde_json::to_string(task)?;
        let mut conn = self.connection().await;
        conn.set_ex(key, body, ttl.as_secs().max(1))
            .await
            .map_err(|e| AppError::CacheError(format!("Failed to dispatch {key}: {e}")))
    }

    async fn get_task(&self, key: &str) -> Result<TaskState> {
        let mut conn = self.connection().await;
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| AppError::CacheError(format!("Failed to read {key}: {e}")))?;

        Ok(match value {
            None => TaskState::Absent,
            Some(raw) if raw == IDLE_SENTINEL => TaskState::Idle,
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(task) => TaskState::Dispatched(task),
                Err(e) => {
                    warn!(%key, error = %e, "Unreadable task body, treating as idle");
                    TaskState::Idle
                }
            },
        })
    }

    async fn delete_task(&self, key: &str) -> Result<()> {
        self.delete(key).await
    }

    async fn acquire_worker_lease(&self, task_key: &str, ttl: Duration) -> Result<bool> {
        self.set_if_absent(&worker_lease_key(task_key), "1", ttl)
            .await
    }

    async fn release_worker_lease(&self, task_key: &str) -> Result<()> {
        self.delete(&worker_lease_key(task_key)).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.connection().await;
        conn.publish(channel, payload)
            .await
            .map(|_: i64| ())
            .map_err(|e| AppError::CacheError(format!("Failed to publish to {channel}: {e}")))
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<MessageStream> {
        let pubsub = self
            .pool
            .subscriber(channels)
            .await
            .map_err(|e| AppError::CacheError(format!("{e:#}")))?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let channel = msg.get_channel_name().to_string();
            match msg.get_payload::<String>() {
                Ok(payload) => Some(PreviewMessage { channel, payload }),
                Err(e) => {
                    warn!(%channel, error = %e, "Dropping non-text pub/sub payload");
                    None
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_helpers() {
        let id = Uuid::nil();
        assert_eq!(
            image_meta_key(id),
            "db:image:uuid:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            preview_task_key(id, 256),
            "task:create_image_preview:00000000-0000-0000-0000-000000000000:256"
        );
        assert_eq!(
            worker_lease_key(&preview_task_key(id, 256)),
            "lock:create_image_preview:00000000-0000-0000-0000-000000000000:256"
        );
    }

    #[test]
    fn test_parse_task_key() {
        let id = Uuid::new_v4();
        assert_eq!(parse_task_key(&preview_task_key(id, 64)), Some((id, 64)));
        assert_eq!(parse_task_key("task:other:abc:64"), None);
        assert_eq!(parse_task_key(&format!("{TASK_KEY_PREFIX}{id}:wide")), None);
    }
}
