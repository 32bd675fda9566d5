use std::sync::Arc;

use tokio::sync::mpsc;

use super::{NotificationEnvelope, NotificationSink, NotifyHandle};

/// Background task delivering notifications to a sink
pub struct NotificationWriter {
    rx: mpsc::Receiver<NotificationEnvelope>,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationWriter {
    pub fn new(rx: mpsc::Receiver<NotificationEnvelope>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { rx, sink }
    }

    /// Deliver notifications until every handle is dropped.
    ///
    /// Spawn this as a background task. Failed deliveries are logged and dropped.
    pub async fn run(mut self) {
        tracing::debug!("Notification writer started");

        while let Some(envelope) = self.rx.recv().await {
            if let Err(e) = self.sink.deliver(&envelope).await {
                tracing::warn!(
                    event = envelope.event.event_type(),
                    error = %e,
                    "Failed to deliver notification"
                );
            }
        }

        tracing::debug!("Notification writer shutting down");
    }
}

/// Create a notification system
///
/// Returns the [`NotifyHandle`] to clone into producers and the
/// [`NotificationWriter`] to spawn with `tokio::spawn(writer.run())`.
pub fn create_notification_system(
    sink: Arc<dyn NotificationSink>,
    buffer_size: usize,
) -> (NotifyHandle, NotificationWriter) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let handle = NotifyHandle::new(tx);
    let writer = NotificationWriter::new(rx, sink);
    (handle, writer)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::crawler::CrawlMode;
    use crate::notify::{CrawlEvent, NotifyError};
    use crate::testing::MemorySink;

    struct FailingSink {
        attempts: Mutex<usize>,
    }

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn deliver(&self, _envelope: &NotificationEnvelope) -> Result<(), NotifyError> {
            *self.attempts.lock().unwrap() += 1;
            Err(NotifyError::Status(503))
        }
    }

    fn started(run_id: &str) -> CrawlEvent {
        CrawlEvent::CrawlStarted {
            run_id: run_id.to_string(),
            mode: CrawlMode::Full,
            hosts: 1,
        }
    }

    fn failed(host_id: i64) -> CrawlEvent {
        CrawlEvent::HostFailed {
            host_id,
            host: format!("mirror{}.example.org", host_id),
            outcome: "timeout".to_string(),
            detail: None,
            consecutive_failures: 1,
        }
    }

    #[tokio::test]
    async fn test_writer_delivers_events() {
        let sink = Arc::new(MemorySink::new());
        let (handle, writer) = create_notification_system(sink.clone(), 10);
        let writer_handle = tokio::spawn(writer.run());

        handle.emit(started("run-1")).await;
        for id in 0..3 {
            handle.emit(failed(id)).await;
        }
        drop(handle);
        writer_handle.await.unwrap();

        let types = sink.event_types();
        assert_eq!(
            types,
            vec!["crawl.started", "host.failed", "host.failed", "host.failed"]
        );
    }

    #[tokio::test]
    async fn test_writer_continues_on_delivery_failure() {
        let sink = Arc::new(FailingSink {
            attempts: Mutex::new(0),
        });
        let (handle, writer) = create_notification_system(sink.clone(), 10);
        let writer_handle = tokio::spawn(writer.run());

        handle.emit(failed(1)).await;
        handle.emit(failed(2)).await;
        drop(handle);

        // Writer should complete normally
        writer_handle.await.unwrap();
        assert_eq!(*sink.attempts.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_writer_waits_for_all_handles_to_drop() {
        let sink = Arc::new(MemorySink::new());
        let (main_handle, writer) = create_notification_system(sink.clone(), 10);
        let worker_handle = main_handle.clone();
        let summary_handle = main_handle.clone();

        let writer_handle = tokio::spawn(writer.run());

        worker_handle.emit(failed(5)).await;
        main_handle.emit(started("run-2")).await;
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        drop(main_handle);
        drop(worker_handle);
        assert!(
            !writer_handle.is_finished(),
            "Writer should still be running with handles alive"
        );

        drop(summary_handle);
        let result = tokio::time::timeout(tokio::time::Duration::from_secs(1), writer_handle).await;
        assert!(result.is_ok(), "Writer should exit after all handles dropped");
        assert_eq!(sink.events().len(), 2);
    }

    #[tokio::test]
    async fn test_events_emitted_just_before_drop_are_delivered() {
        let sink = Arc::new(MemorySink::new());
        let (handle, writer) = create_notification_system(sink.clone(), 100);
        let writer_handle = tokio::spawn(writer.run());

        assert!(handle.try_emit(started("run-3")));
        drop(handle);

        writer_handle.await.unwrap();
        assert_eq!(sink.event_types(), vec!["crawl.started"]);
    }

    #[test]
    fn test_zero_buffer_is_clamped() {
        let sink = Arc::new(MemorySink::new());
        let (handle, _writer) = create_notification_system(sink, 0);
        assert!(handle.try_emit(started("run-4")));
    }
}
