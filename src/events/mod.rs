//! In-process broadcast bus for realtime fan-out.
//!
//! Compact `{type, data, timestamp}` events are published on created or
//! updated predictions, alarms, and state alerts; the SSE endpoint drains
//! the bus for HTTP subscribers. Publishing never blocks and never fails -
//! an event with no subscribers is simply dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// One bus event.
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast bus handle. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; non-blocking, drops when nobody listens.
    pub fn publish(&self, event_type: &str, data: serde_json::Value) {
        let event = BusEvent {
            event_type: event_type.to_string(),
            data,
            timestamp: Utc::now(),
        };
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
