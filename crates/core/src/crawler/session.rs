use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::HostAbort;
use crate::probe::Prober;

/// One host's crawl: its prober, its time budget and its abort signal.
///
/// Every loop over categories or directories calls [`HostSession::check`]
/// before doing more work.
pub struct HostSession {
    host_id: i64,
    prober: Arc<dyn Prober>,
    started: Instant,
    budget: Duration,
    abort: CancellationToken,
}

impl HostSession {
    pub fn new(
        host_id: i64,
        prober: Arc<dyn Prober>,
        budget: Duration,
        abort: CancellationToken,
    ) -> Self {
        Self {
            host_id,
            prober,
            started: Instant::now(),
            budget,
            abort,
        }
    }

    pub fn host_id(&self) -> i64 {
        self.host_id
    }

    pub fn prober(&self) -> &dyn Prober {
        self.prober.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.elapsed())
    }

    pub fn check(&self) -> Result<(), HostAbort> {
        if self.abort.is_cancelled() {
            return Err(HostAbort::Interrupted);
        }
        let elapsed = self.elapsed();
        if elapsed >= self.budget {
            return Err(HostAbort::Timeout { elapsed });
        }
        Ok(())
    }

    /// Sleep at most until the deadline, waking early on abort.
    pub async fn sleep(&self, delay: Duration) -> Result<(), HostAbort> {
        let delay = delay.min(self.remaining());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.abort.cancelled() => {}
        }
        self.check()
    }

    pub async fn close(&self) {
        for e in self.prober.close().await {
            warn!(host_id = self.host_id, error = %e, "Error while closing connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProber;

    fn session(budget: Duration, abort: CancellationToken) -> HostSession {
        HostSession::new(1, Arc::new(MockProber::new()), budget, abort)
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let s = session(Duration::from_secs(60), CancellationToken::new());
        assert!(s.check().is_ok());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(s.remaining(), Duration::from_secs(30));
        assert!(s.check().is_ok());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(matches!(s.check(), Err(HostAbort::Timeout { .. })));
        assert_eq!(s.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_is_capped_by_deadline() {
        let s = session(Duration::from_secs(10), CancellationToken::new());
        let result = s.sleep(Duration::from_secs(60)).await;
        assert!(matches!(result, Err(HostAbort::Timeout { .. })));
        assert!(s.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_wakes_sleep() {
        let abort = CancellationToken::new();
        let s = session(Duration::from_secs(600), abort.clone());

        let trigger = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = s.sleep(Duration::from_secs(60)).await;
        assert_eq!(result, Err(HostAbort::Interrupted));
        assert!(s.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_close_logs_errors() {
        let prober = Arc::new(MockProber::new().with_close_error("QUIT refused"));
        let s = HostSession::new(1, prober.clone(), Duration::from_secs(60), CancellationToken::new());
        s.close().await;
        assert_eq!(prober.close_calls(), 1);
    }
}
