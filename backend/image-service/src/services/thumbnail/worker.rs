//! Thumbnail worker - listens on the preview channels
//!
//! `create_image_preview_done` messages wake local waiters.
//! `create_image_preview_task` messages are generated by whichever
//! generation-enabled process takes the worker lease for the task key.

use super::service::{GenerateOutcome, ThumbnailGenerator};
use super::waiters::WaiterRegistry;
use super::ThumbnailSettings;
use crate::cache::{
    parse_task_key, MessageStream, PreviewCache, PreviewMessage, TaskState, PREVIEW_DONE_CHANNEL,
    PREVIEW_TASK_CHANNEL,
};
use crate::error::Result;
use crate::metrics;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// How a single task message was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Generated,
    /// Width already registered; done published without generating
    AlreadyPresent,
    /// Another process holds the lease, or the key is not a live task
    NotClaimed,
    Failed,
}

impl TaskOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Generated => "success",
            Self::AlreadyPresent | Self::NotClaimed => "skipped",
            Self::Failed => "failed",
        }
    }
}

pub struct ThumbnailWorker {
    generator: Arc<ThumbnailGenerator>,
    cache: Arc<dyn PreviewCache>,
    waiters: Arc<WaiterRegistry>,
    settings: ThumbnailSettings,
}

impl ThumbnailWorker {
    pub fn new(
        generator: Arc<ThumbnailGenerator>,
        cache: Arc<dyn PreviewCache>,
        waiters: Arc<WaiterRegistry>,
        settings: ThumbnailSettings,
    ) -> Self {
        Self {
            generator,
            cache,
            waiters,
            settings,
        }
    }

    /// Subscribe to both channels, then run the listener in the background.
    ///
    /// The subscription is live when this returns, so requests issued
    /// afterwards cannot miss their done message.
    pub async fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<JoinHandle<()>> {
        let stream = self.subscribe().await?;
        info!(
            generate_enabled = self.settings.generate_enabled,
            "Thumbnail listener subscribed"
        );
        Ok(tokio::spawn(self.run(stream, shutdown)))
    }

    async fn subscribe(&self) -> Result<MessageStream> {
        self.cache
            .subscribe(&[PREVIEW_TASK_CHANNEL, PREVIEW_DONE_CHANNEL])
            .await
    }

    async fn run(self: Arc<Self>, mut stream: MessageStream, mut shutdown: watch::Receiver<bool>) {
        let mut prune = tokio::time::interval(PRUNE_INTERVAL);
        prune.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Thumbnail listener shutting down");
                        return;
                    }
                }
                _ = prune.tick() => {
                    let removed = self.waiters.prune();
                    if removed > 0 {
                        debug!(removed, "Pruned abandoned thumbnail waiters");
                    }
                }
                message = stream.next() => match message {
                    Some(message) => self.handle_message(message),
                    None => {
                        warn!("Preview subscription closed, resubscribing");
                        match self.resubscribe(&mut shutdown).await {
                            Some(next) => stream = next,
                            None => return,
                        }
                    }
                },
            }
        }
    }

    /// Retry until subscribed again. Returns `None` on shutdown.
    async fn resubscribe(&self, shutdown: &mut watch::Receiver<bool>) -> Option<MessageStream> {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return None;
                    }
                }
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {
                    match self.subscribe().await {
                        Ok(stream) => {
                            info!("Preview subscription restored");
                            return Some(stream);
                        }
                        Err(e) => error!(error = %e, "Failed to resubscribe to preview channels"),
                    }
                }
            }
        }
    }

    fn handle_message(self: &Arc<Self>, message: PreviewMessage) {
        match message.channel.as_str() {
            PREVIEW_DONE_CHANNEL => {
                let woken = self.waiters.notify_done(&message.payload);
                debug!(task_key = %message.payload, woken, "Thumbnail task done");
            }
            PREVIEW_TASK_CHANNEL if self.settings.generate_enabled => {
                // Generation runs detached so done messages keep flowing.
                let worker = Arc::clone(self);
                tokio::spawn(async move {
                    worker.process_task(&message.payload).await;
                });
            }
            PREVIEW_TASK_CHANNEL => {}
            other => debug!(channel = %other, "Ignoring message on unexpected channel"),
        }
    }

    /// Generate the thumbnail for a task key if this process wins the lease.
    pub async fn process_task(&self, key: &str) -> TaskOutcome {
        if parse_task_key(key).is_none() {
            warn!(task_key = %key, "Ignoring malformed task key");
            return TaskOutcome::NotClaimed;
        }

        let outcome = match self
            .cache
            .acquire_worker_lease(key, self.settings.task_ttl)
            .await
        {
            Ok(true) => {
                let outcome = self.process_leased(key).await;
                if let Err(e) = self.cache.release_worker_lease(key).await {
                    warn!(task_key = %key, error = %e, "Failed to release worker lease");
                }
                outcome
            }
            Ok(false) => {
                debug!(task_key = %key, "Task taken by another worker");
                TaskOutcome::NotClaimed
            }
            Err(e) => {
                error!(task_key = %key, error = %e, "Failed to acquire worker lease");
                TaskOutcome::Failed
            }
        };

        metrics::record_generation(outcome.as_label());
        outcome
    }

    async fn process_leased(&self, key: &str) -> TaskOutcome {
        let task = match self.cache.get_task(key).await {
            Ok(TaskState::Dispatched(task))
                if parse_task_key(key) == Some((task.uuid, task.thumbs_size)) =>
            {
                task
            }
            Ok(state) => {
                debug!(task_key = %key, ?state, "Task key is not a dispatched task for this key");
                return TaskOutcome::NotClaimed;
            }
            Err(e) => {
                error!(task_key = %key, error = %e, "Failed to read task");
                return TaskOutcome::Failed;
            }
        };

        let outcome = match self.generator.generate(&task).await {
            Ok(GenerateOutcome::Generated) => TaskOutcome::Generated,
            Ok(GenerateOutcome::AlreadyPresent) => TaskOutcome::AlreadyPresent,
            Err(e) => {
                error!(
                    uuid = %task.uuid,
                    width = task.thumbs_size,
                    error = %e,
                    "Failed to generate thumbnail"
                );
                // Waiters time out and get the original; a later request may retry.
                if let Err(e) = self.cache.delete_task(key).await {
                    warn!(task_key = %key, error = %e, "Failed to delete task key");
                }
                return TaskOutcome::Failed;
            }
        };

        if let Err(e) = self.cache.invalidate_image(task.uuid).await {
            warn!(uuid = %task.uuid, error = %e, "Failed to invalidate image metadata");
        }
        if let Err(e) = self.cache.delete_task(key).await {
            warn!(task_key = %key, error = %e, "Failed to delete task key");
        }
        if let Err(e) = self.cache.publish(PREVIEW_DONE_CHANNEL, key).await {
            warn!(task_key = %key, error = %e, "Failed to publish task completion");
        }

        outcome
    }
}
