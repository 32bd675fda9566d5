//! In-memory notification sink for testing.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::notify::{CrawlEvent, NotificationEnvelope, NotificationSink, NotifyError};

/// Captures every delivered notification.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<CrawlEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CrawlEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(CrawlEvent::event_type)
            .collect()
    }

    /// Events about one host.
    pub fn events_for(&self, host_id: i64) -> Vec<CrawlEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.host_id() == Some(host_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn deliver(&self, envelope: &NotificationEnvelope) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(envelope.event.clone());
        Ok(())
    }
}
