//! Process-local registry of requests waiting for a thumbnail task

use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::oneshot;

/// Maps a task key to the requests in this process waiting on it.
///
/// Owned by one service instance; nothing here is shared across processes.
#[derive(Debug, Default)]
pub struct WaiterRegistry {
    waiters: DashMap<String, Vec<oneshot::Sender<()>>>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `key`. Must happen before the task is
    /// dispatched so a fast completion is not missed.
    pub fn register(&self, key: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.entry(key.to_string()).or_default().push(tx);
        rx
    }

    /// Wake every waiter registered for `key` and forget the key.
    /// Returns how many waiters were still listening.
    pub fn notify_done(&self, key: &str) -> usize {
        match self.waiters.remove(key) {
            Some((_, senders)) => senders
                .into_iter()
                .filter_map(|tx| tx.send(()).ok())
                .count(),
            None => 0,
        }
    }

    /// Drop senders whose receiver is gone (timed out or disconnected).
    /// Returns the number removed.
    pub fn prune(&self) -> usize {
        let mut removed = 0;
        self.waiters.retain(|_, senders| {
            let before = senders.len();
            senders.retain(|tx| !tx.is_closed());
            removed += before - senders.len();
            !senders.is_empty()
        });
        removed
    }

    /// Number of waiters registered for `key`, including abandoned ones
    pub fn pending(&self, key: &str) -> usize {
        self.waiters.get(key).map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// Wait up to `timeout` for a completion signal. Returns false on timeout
/// or if the registry dropped the sender without signalling.
pub async fn wait_for(rx: oneshot::Receiver<()>, timeout: Duration) -> bool {
    matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())))
}
