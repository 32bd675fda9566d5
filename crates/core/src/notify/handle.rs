use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::CrawlEvent;

/// Envelope wrapping a notification with metadata
#[derive(Debug, Clone)]
pub struct NotificationEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: CrawlEvent,
}

/// Handle for emitting notifications
///
/// Cheaply cloneable. Events go through a bounded channel to the
/// [`NotificationWriter`](super::NotificationWriter); delivery problems never
/// reach the caller.
#[derive(Clone)]
pub struct NotifyHandle {
    tx: mpsc::Sender<NotificationEnvelope>,
}

impl NotifyHandle {
    pub fn new(tx: mpsc::Sender<NotificationEnvelope>) -> Self {
        Self { tx }
    }

    /// Emit a notification, waiting for channel capacity.
    ///
    /// A closed channel is logged, not returned.
    pub async fn emit(&self, event: CrawlEvent) {
        let envelope = NotificationEnvelope {
            timestamp: Utc::now(),
            event,
        };
        if let Err(e) = self.tx.send(envelope).await {
            tracing::error!("Failed to emit notification: {}", e);
        }
    }

    /// Emit a notification without waiting.
    ///
    /// Returns false when the channel is full or closed; the event is dropped.
    pub fn try_emit(&self, event: CrawlEvent) -> bool {
        let envelope = NotificationEnvelope {
            timestamp: Utc::now(),
            event,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to emit notification: {}", e);
                false
            }
        }
    }
}
