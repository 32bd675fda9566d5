//! Prometheus metrics for a crawl run.
//!
//! Collectors live in a [`prometheus::Registry`] owned by [`CrawlMetrics`];
//! nothing is registered globally. At the end of a run the text exposition can
//! be written for the node-exporter textfile collector.

use std::path::Path;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::crawler::HostOutcome;
use crate::reconcile::SyncStats;

/// Crawl run metrics.
#[derive(Clone)]
pub struct CrawlMetrics {
    registry: Registry,
    hosts: IntCounterVec,
    host_duration: HistogramVec,
    directories: IntCounterVec,
    in_flight: IntGauge,
}

impl CrawlMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // =====================================================================
        // Hosts
        // =====================================================================

        let hosts = IntCounterVec::new(
            Opts::new("mirrorcrawl_hosts_total", "Hosts crawled by outcome"),
            &["outcome"],
        )?;
        let host_duration = HistogramVec::new(
            HistogramOpts::new(
                "mirrorcrawl_host_crawl_seconds",
                "Duration of one host crawl",
            )
            .buckets(vec![
                1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0,
            ]),
            &["outcome"],
        )?;
        let in_flight = IntGauge::new("mirrorcrawl_hosts_in_flight", "Hosts being crawled")?;

        // =====================================================================
        // Directories
        // =====================================================================

        let directories = IntCounterVec::new(
            Opts::new(
                "mirrorcrawl_directories_total",
                "Directory records by reconciliation result",
            ),
            &["status"], // "up2date", "not_up2date", "unchanged", "unreadable", "unknown", "created", "demoted_missing"
        )?;

        registry.register(Box::new(hosts.clone()))?;
        registry.register(Box::new(host_duration.clone()))?;
        registry.register(Box::new(directories.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;

        Ok(Self {
            registry,
            hosts,
            host_duration,
            directories,
            in_flight,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn host_started(&self) {
        self.in_flight.inc();
    }

    pub fn host_finished(&self) {
        self.in_flight.dec();
    }

    pub fn record_host(&self, outcome: &HostOutcome, seconds: f64) {
        let label = outcome.as_str();
        self.hosts.with_label_values(&[label]).inc();
        self.host_duration
            .with_label_values(&[label])
            .observe(seconds);
    }

    pub fn record_stats(&self, stats: &SyncStats) {
        let counts = [
            ("up2date", stats.up2date),
            ("not_up2date", stats.not_up2date),
            ("unchanged", stats.unchanged),
            ("unreadable", stats.unreadable),
            ("unknown", stats.unknown),
            ("created", stats.created),
            ("demoted_missing", stats.demoted_missing),
        ];
        for (status, count) in counts {
            self.directories
                .with_label_values(&[status])
                .inc_by(count as u64);
        }
    }

    /// Text exposition of every collector.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Write the exposition atomically: a temp file next to `path`, then rename.
    pub async fn write_textfile(&self, path: &Path) -> Result<(), std::io::Error> {
        let rendered = self
            .render()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        let tmp = path.with_extension("prom.tmp");
        tokio::fs::write(&tmp, rendered).await?;
        tokio::fs::rename(&tmp, path).await
    }
}

impl std::fmt::Debug for CrawlMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlMetrics")
            .field("in_flight", &self.in_flight.get())
            .finish()
    }
}
