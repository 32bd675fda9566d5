//! What a host crawl outcome does to the host's persisted state.

use chrono::{DateTime, Utc};

use crate::crawler::{CrawlMode, HostCrawlReport, HostOutcome};
use crate::notify::CrawlEvent;
use crate::registry::{Host, HostUpdate};

pub const TIMEOUT_REASON: &str = "Crawler timed out before completing. Host is likely overloaded.";
pub const CANARY_FAILED_REASON: &str =
    "Canary mode failed for all categories. Marking host as not up to date.";
pub const UNHANDLED_ERROR_REASON: &str = "Unhandled error raised. This is a bug in the crawler.";

/// Run-wide inputs to a decision.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext {
    pub mode: CrawlMode,
    pub now: DateTime<Utc>,
}

/// Everything to persist and announce for one host crawl.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HostDecision {
    /// Absolute host metadata to write, `None` to leave the host untouched.
    pub host_update: Option<HostUpdate>,
    /// Flag every directory record of the host stale, with this reason.
    pub mark_not_up2date: Option<String>,
    /// Apply the reconciliation plan built from the crawl's verdicts.
    pub reconcile: bool,
    pub events: Vec<CrawlEvent>,
}

impl HostDecision {
    /// Nothing is persisted or announced.
    pub fn is_noop(&self) -> bool {
        self.host_update.is_none() && self.mark_not_up2date.is_none() && !self.reconcile
    }
}

/// Host outcome state machine.
#[derive(Debug, Clone, Copy)]
pub struct OutcomePolicy {
    threshold: u32,
}

impl OutcomePolicy {
    /// `threshold` consecutive failures disable a host.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn disable_reason(&self) -> String {
        format!(
            "Host has been disabled (user_active) after {} consecutive crawl failures",
            self.threshold
        )
    }

    pub fn decide(&self, host: &Host, report: &HostCrawlReport, ctx: &PolicyContext) -> HostDecision {
        let outcome = &report.outcome;
        if matches!(outcome, HostOutcome::WrongContinent | HostOutcome::Interrupted) {
            return HostDecision::default();
        }

        let mut update = HostUpdate {
            crawl_failures: host.crawl_failures,
            user_active: host.user_active,
            disable_reason: host.disable_reason.clone(),
            last_crawled: Some(ctx.now),
            last_crawl_duration: host.last_crawl_duration,
        };
        let mut decision = HostDecision::default();
        let elapsed = report.elapsed.as_secs() as i64;

        match outcome {
            HostOutcome::Success => {
                update.crawl_failures = 0;
                decision.reconcile = true;
                decision.mark_not_up2date = report.flag_reason.clone();
            }
            HostOutcome::NoCategoriesConfigured => {}
            HostOutcome::Embargoed { country } => {
                let reason = format!("Embargoed country: {}", country);
                update.user_active = false;
                update.disable_reason = Some(reason.clone());
                decision.events.push(CrawlEvent::HostDisabled {
                    host_id: host.id,
                    host: host.name.clone(),
                    reason,
                });
            }
            HostOutcome::CanaryAllFailed => {
                decision.mark_not_up2date = Some(CANARY_FAILED_REASON.to_string());
            }
            HostOutcome::Timeout => {
                decision.mark_not_up2date = Some(TIMEOUT_REASON.to_string());
            }
            HostOutcome::UnhandledError => {
                decision.mark_not_up2date = Some(UNHANDLED_ERROR_REASON.to_string());
            }
            HostOutcome::AllCategoriesUnreachable | HostOutcome::GeoLookupFailed => {}
            HostOutcome::WrongContinent | HostOutcome::Interrupted => {}
        }

        // Lightweight passes say nothing about how long a full crawl takes.
        let record_duration = match outcome {
            HostOutcome::Timeout => true,
            HostOutcome::NoCategoriesConfigured => false,
            _ => !ctx.mode.is_lightweight(),
        };
        if record_duration {
            update.last_crawl_duration = Some(elapsed);
        }

        if outcome.counts_as_failure() {
            update.crawl_failures = host.crawl_failures.saturating_add(1);
            decision.events.push(CrawlEvent::HostFailed {
                host_id: host.id,
                host: host.name.clone(),
                outcome: outcome.as_str().to_string(),
                detail: report.detail.clone(),
                consecutive_failures: update.crawl_failures,
            });
            if update.crawl_failures >= self.threshold && update.user_active {
                let reason = self.disable_reason();
                update.user_active = false;
                update.disable_reason = Some(reason.clone());
                decision.events.push(CrawlEvent::HostDisabled {
                    host_id: host.id,
                    host: host.name.clone(),
                    reason,
                });
            }
        }

        if let Some(reason) = &decision.mark_not_up2date {
            decision.events.push(CrawlEvent::HostMarkedNotUp2date {
                host_id: host.id,
                host: host.name.clone(),
                reason: reason.clone(),
            });
        }

        decision.host_update = Some(update);
        decision
    }
}
