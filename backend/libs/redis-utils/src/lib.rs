use anyhow::{Context, Result};
use redis::aio::{ConnectionManager, PubSub};
use redis::{Client, IntoConnectionInfo};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Redis command connection plus the client used to open pub/sub connections.
///
/// Pub/sub connections cannot share the multiplexed command connection, so the
/// pool keeps the [`Client`] around and hands out dedicated subscribers.
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
    manager: SharedConnectionManager,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let info = redis_url
            .into_connection_info()
            .context("failed to parse REDIS_URL connection string")?;
        let db = info.redis.db;

        let client = Client::open(info).context("failed to construct Redis client")?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .context("failed to initialize Redis connection manager")?;

        info!(db, "Redis connection manager ready");

        Ok(Self {
            client,
            manager: Arc::new(Mutex::new(manager)),
        })
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }

    /// Open a dedicated pub/sub connection subscribed to every channel in `channels`.
    pub async fn subscriber(&self, channels: &[&str]) -> Result<PubSub> {
        open_subscriber(&self.client, channels).await
    }
}

/// Open a pub/sub connection on `client` and subscribe it to `channels`.
pub async fn open_subscriber(client: &Client, channels: &[&str]) -> Result<PubSub> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .context("failed to open Redis pub/sub connection")?;

    for channel in channels {
        pubsub
            .subscribe(*channel)
            .await
            .with_context(|| format!("failed to subscribe to channel {channel}"))?;
        debug!(channel = %channel, "Subscribed to Redis channel");
    }

    Ok(pubsub)
}
