//! Upload progress fan-out
//!
//! Progress is best-effort telemetry. Every subscriber owns a bounded
//! channel; a subscriber that is not keeping up misses events and a
//! subscriber that went away is pruned on the next broadcast.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events buffered per subscriber before new ones are dropped
pub const SUBSCRIBER_BUFFER: usize = 64;

/// Percentage of chunks written for one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub upload_id: Uuid,
    #[serde(rename = "progress")]
    pub percent: u8,
}

impl ProgressEvent {
    /// `round(completed / total * 100)`, halves rounding up
    pub fn new(upload_id: Uuid, completed: u64, total: u64) -> Self {
        let percent = if total == 0 {
            100
        } else {
            let completed = completed.min(total) as u128;
            ((completed * 100 + total as u128 / 2) / total as u128) as u8
        };

        Self { upload_id, percent }
    }
}

/// Receiver of progress events
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

/// Discards every event
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn publish(&self, _event: ProgressEvent) {}
}

/// What a subscriber wants to hear about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    /// Every upload
    All,
    /// A single upload
    Upload(Uuid),
}

impl Topic {
    fn matches(&self, event: &ProgressEvent) -> bool {
        match self {
            Topic::All => true,
            Topic::Upload(id) => *id == event.upload_id,
        }
    }
}

struct Subscriber {
    id: u64,
    topic: Topic,
    tx: mpsc::Sender<ProgressEvent>,
}

/// Topic-keyed broadcaster
#[derive(Clone, Default)]
pub struct ProgressBroadcaster {
    inner: Arc<BroadcasterInner>,
}

#[derive(Default)]
struct BroadcasterInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

/// Receiving half handed to an observer
pub struct Subscription {
    pub id: u64,
    pub topic: Topic,
    rx: mpsc::Receiver<ProgressEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner.subscribers.lock().push(Subscriber { id, topic, tx });
        tracing::debug!(subscriber = id, ?topic, "Progress subscriber registered");

        Subscription { id, topic, rx }
    }

    /// Push `event` to every matching subscriber without waiting
    pub fn broadcast(&self, event: ProgressEvent) {
        let mut subscribers = self.inner.subscribers.lock();

        subscribers.retain(|sub| {
            if !sub.topic.matches(&event) {
                return !sub.tx.is_closed();
            }

            match sub.tx.try_send(event) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(subscriber = sub.id, "Progress subscriber lagging, event dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(subscriber = sub.id, "Progress subscriber gone, pruned");
                    false
                }
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl ProgressSink for ProgressBroadcaster {
    fn publish(&self, event: ProgressEvent) {
        self.broadcast(event);
    }
}
