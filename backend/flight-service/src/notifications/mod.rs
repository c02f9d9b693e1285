//! In-process notification hub
//!
//! The pipeline emits abstract notification events (batch ingested, new
//! tickets, backlog processed) into a broadcast channel. The transport that
//! fans these out to clients lives outside this service; anything in-process
//! can attach with `subscribe`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// One pipeline notification
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub event: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<Notification>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit a notification. Lagging or absent subscribers never block or
    /// fail the pipeline.
    pub fn notify<T: Serialize>(&self, event: &str, payload: &T) {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                debug!(event = event, error = %e, "Dropping unserializable notification");
                return;
            }
        };
        let notification = Notification {
            event: event.to_string(),
            payload,
            timestamp: Utc::now(),
        };
        // send only errors when there are no receivers, which is fine
        let _ = self.sender.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let hub = NotificationHub::new(8);
        let mut rx = hub.subscribe();

        hub.notify("backlogProcessed", &serde_json::json!({ "processedCount": 3 }));

        let notification = rx.recv().await.unwrap();
        assert_eq!(notification.event, "backlogProcessed");
        assert_eq!(notification.payload["processedCount"], 3);
    }

    #[test]
    fn notify_without_subscribers_is_a_noop() {
        let hub = NotificationHub::new(8);
        hub.notify("newFlightTickets", &serde_json::json!([]));
    }
}
