use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use super::NotificationEnvelope;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook returned status {0}")]
    Status(u16),
}

/// Destination for operator notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, envelope: &NotificationEnvelope) -> Result<(), NotifyError>;
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, envelope: &NotificationEnvelope) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&envelope.event).unwrap_or_default();
        tracing::info!(
            event = envelope.event.event_type(),
            host_id = envelope.event.host_id(),
            payload = %payload,
            "Notification"
        );
        Ok(())
    }
}

/// POSTs each notification as JSON to a webhook.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[derive(serde::Serialize)]
struct WebhookPayload<'a> {
    timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    event: &'a super::CrawlEvent,
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, envelope: &NotificationEnvelope) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            timestamp: envelope.timestamp,
            event: &envelope.event,
        };
        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
