use std::sync::Arc;

use dashmap::DashMap;
use harborkv_proto::Resp;
use tokio::sync::mpsc;

use crate::glob::glob_match;
use crate::metrics::Metrics;

/// A single channel: exact-name, or glob-pattern when `pattern` is set.
/// Messages pass through the channel's own bounded queue and are fanned out
/// by one delivery worker, so delivery is FIFO per channel.
pub struct Channel {
    name: String,
    pattern: bool,
    subscribers: DashMap<u64, mpsc::Sender<Resp>>,
    queue_tx: mpsc::Sender<String>,
}

impl Channel {
    pub fn spawn(
        name: impl Into<String>,
        pattern: bool,
        capacity: usize,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let (queue_tx, mut queue_rx) = mpsc::channel::<String>(capacity);
        let channel = Arc::new(Self {
            name: name.into(),
            pattern,
            subscribers: DashMap::new(),
            queue_tx,
        });

        let worker = channel.clone();
        tokio::spawn(async move {
            while let Some(payload) = queue_rx.recv().await {
                let frame = Resp::Array(vec![
                    Resp::bulk("message"),
                    Resp::bulk(&worker.name),
                    Resp::bulk(&payload),
                ]);
                let mut closed = Vec::new();
                for entry in worker.subscribers.iter() {
                    match entry.value().try_send(frame.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => metrics.inc_dropped(),
                        Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*entry.key()),
                    }
                }
                for conn_id in closed {
                    worker.subscribers.remove(&conn_id);
                }
            }
        });
        channel
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_pattern(&self) -> bool {
        self.pattern
    }

    /// Does a published channel name land here?
    pub fn matches(&self, published: &str) -> bool {
        if self.pattern {
            glob_match(&self.name, published)
        } else {
            self.name == published
        }
    }

    pub fn subscribe(&self, conn_id: u64, tx: mpsc::Sender<Resp>) {
        self.subscribers.insert(conn_id, tx);
    }

    pub fn unsubscribe(&self, conn_id: u64) -> bool {
        self.subscribers.remove(&conn_id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// A channel is active iff it has at least one subscriber.
    pub fn is_active(&self) -> bool {
        !self.subscribers.is_empty()
    }

    /// Enqueue for delivery; returns the number of subscribers the worker
    /// will target.
    pub fn publish(&self, payload: &str) -> usize {
        let n = self.subscribers.len();
        if n == 0 {
            return 0;
        }
        if self.queue_tx.try_send(payload.to_string()).is_err() {
            return 0;
        }
        n
    }
}
