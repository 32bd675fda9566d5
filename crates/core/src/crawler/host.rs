use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    CategoryEngine, CategoryOutcome, CategoryScan, ContinentCheck, CrawlMode, CrawlSettings,
    HostAbort, HostCrawlReport, HostOutcome, HostSession,
};
use crate::geo::GeoGate;
use crate::probe::Prober;
use crate::registry::{Host, HostCategory, MirrorRegistry};

/// Reason recorded when an rsync pass came back empty.
pub const RSYNC_EMPTY_REASON: &str =
    "No host category directories found. Check that your Host Category URLs are correct.";

/// Crawls one host at a time: every selected category through the strategy engine.
///
/// Persists nothing; the report goes to policy and reconciliation.
#[derive(Clone)]
pub struct HostCrawler {
    registry: Arc<dyn MirrorRegistry>,
    settings: CrawlSettings,
    geo: Option<GeoGate>,
}

struct CategoriesCrawled {
    reachable: usize,
    scans: Vec<CategoryScan>,
}

impl HostCrawler {
    pub fn new(
        registry: Arc<dyn MirrorRegistry>,
        settings: CrawlSettings,
        geo: Option<GeoGate>,
    ) -> Self {
        Self {
            registry,
            settings,
            geo,
        }
    }

    pub fn settings(&self) -> &CrawlSettings {
        &self.settings
    }

    pub async fn crawl(
        &self,
        host: &Host,
        prober: Arc<dyn Prober>,
        abort: CancellationToken,
    ) -> HostCrawlReport {
        let session = HostSession::new(host.id, prober, self.settings.host_budget, abort);
        let result = self.crawl_categories(&session, host).await;
        session.close().await;
        let elapsed = session.elapsed();

        let (outcome, detail, scans) = match result {
            Ok(None) => {
                info!(host_id = host.id, "No categories to crawl");
                (HostOutcome::NoCategoriesConfigured, None, Vec::new())
            }
            Ok(Some(crawled)) if crawled.reachable == 0 => {
                let outcome = if self.settings.mode == CrawlMode::Canary {
                    HostOutcome::CanaryAllFailed
                } else {
                    HostOutcome::AllCategoriesUnreachable
                };
                warn!(host_id = host.id, "No category could be reached");
                (
                    outcome,
                    Some("no category had a working base URL".to_string()),
                    crawled.scans,
                )
            }
            Ok(Some(crawled)) => (HostOutcome::Success, None, crawled.scans),
            Err(abort) => {
                match &abort {
                    HostAbort::Fatal(message) => {
                        warn!(host_id = host.id, error = %message, "Unhandled error while crawling")
                    }
                    other => info!(host_id = host.id, reason = %other, "Host crawl aborted"),
                }
                let detail = abort.to_string();
                (HostOutcome::from(abort), Some(detail), Vec::new())
            }
        };

        let flag_reason = scans
            .iter()
            .any(|scan| scan.rsync_empty)
            .then(|| RSYNC_EMPTY_REASON.to_string());

        HostCrawlReport {
            outcome,
            detail,
            scans,
            flag_reason,
            elapsed,
        }
    }

    fn select_categories(&self, host: &Host) -> Result<Vec<HostCategory>, HostAbort> {
        let mut categories = self.registry.host_categories(host.id)?;
        if !self.settings.categories.is_empty() {
            categories.retain(|hc| {
                self.settings
                    .categories
                    .iter()
                    .any(|name| name == &hc.category.name)
            });
        }
        Ok(categories)
    }

    /// `Ok(None)` when the host has nothing to crawl.
    async fn crawl_categories(
        &self,
        session: &HostSession,
        host: &Host,
    ) -> Result<Option<CategoriesCrawled>, HostAbort> {
        let categories = self.select_categories(host)?;
        if categories.is_empty() {
            return Ok(None);
        }

        let mut engine = CategoryEngine::new(self.registry.clone(), self.settings.clone());
        let mut continent = ContinentCheck::new(self.geo.clone());
        let mut crawled = CategoriesCrawled {
            reachable: 0,
            scans: Vec::new(),
        };

        for hc in &categories {
            session.check()?;
            if hc.always_up2date {
                debug!(category = %hc.category.name, "Category is always up to date");
                crawled.reachable += 1;
                continue;
            }
            match engine.scan(session, hc, &mut continent).await? {
                CategoryOutcome::Unreachable => {}
                CategoryOutcome::Reachable => crawled.reachable += 1,
                CategoryOutcome::Scanned(scan) => {
                    crawled.reachable += 1;
                    crawled.scans.push(scan);
                }
            }
        }
        Ok(Some(crawled))
    }
}
