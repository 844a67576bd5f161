use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::RepairStatus;

/// Published whenever a repair task changes state.
#[derive(Debug, Clone, Serialize)]
pub struct RepairEvent {
    /// Event type, e.g. "repair.queued", "repair.finished"
    #[serde(rename = "type")]
    pub event_type: String,
    /// Task id (the owning record id)
    pub task_id: String,
    pub content_id: String,
    pub status: RepairStatus,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RepairEvent {
    /// Create a repair event timestamped to now.
    pub fn now(
        event_type: impl Into<String>,
        task_id: impl Into<String>,
        content_id: impl Into<String>,
        status: RepairStatus,
        message: Option<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            task_id: task_id.into(),
            content_id: content_id.into(),
            status,
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast-based event bus.
///
/// Subscribers receive events via `tokio::sync::broadcast`. If a subscriber
/// falls behind, it receives `RecvError::Lagged` and can re-read the task list.
/// Dropping the receiver unsubscribes.
pub struct EventBus<T: Clone> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. If there are no subscribers the event is dropped silently.
    pub fn publish(&self, event: T) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
