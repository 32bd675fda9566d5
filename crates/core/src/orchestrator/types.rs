//! Types for the crawl orchestrator.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::crawler::{CrawlMode, CrawlSettings, HostOutcome, OutcomeClass, PropagationStatus};
use crate::notify::HostFailure;
use crate::reconcile::SyncStats;
use crate::registry::{HostFilter, RegistryError};

/// Errors that end a run before any host is crawled.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("invalid run options: {0}")]
    InvalidOptions(String),

    #[error("a run is already in progress")]
    AlreadyRunning,
}

/// Slice `part` of `of` roughly equal slices of the selected hosts, by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fraction {
    pub part: usize,
    pub of: usize,
}

impl FromStr for Fraction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (part, of) = s
            .split_once(':')
            .ok_or_else(|| format!("expected p:n, got '{}'", s))?;
        let part: usize = part
            .trim()
            .parse()
            .map_err(|_| format!("invalid slice number in '{}'", s))?;
        let of: usize = of
            .trim()
            .parse()
            .map_err(|_| format!("invalid slice count in '{}'", s))?;
        if of == 0 || part == 0 || part > of {
            return Err(format!("slice must satisfy 1 <= p <= n, got '{}'", s));
        }
        Ok(Self { part, of })
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.part, self.of)
    }
}

/// Validated options of one run: the config merged with command-line overrides.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: CrawlMode,
    pub start_id: Option<i64>,
    pub stop_id: Option<i64>,
    pub fraction: Option<Fraction>,
    pub include_private: bool,
    /// Category names; empty crawls every category.
    pub categories: Vec<String>,
    pub threads: usize,
    pub host_timeout: Duration,
    pub rsync_timeout: Option<Duration>,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub auto_disable_threshold: u32,
    pub shutdown_grace: Duration,
    pub run_timeout: Option<Duration>,
    /// Run a propagation check of this path instead of a crawl.
    pub propagation_path: Option<String>,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        let crawler = &config.crawler;
        Self {
            mode: CrawlMode::Full,
            start_id: None,
            stop_id: None,
            fraction: None,
            include_private: crawler.include_private,
            categories: Vec::new(),
            threads: crawler.threads,
            host_timeout: crawler.host_timeout(),
            rsync_timeout: crawler.rsync_timeout_secs.map(Duration::from_secs),
            backoff_initial: Duration::from_secs(config.backoff.initial_secs),
            backoff_max: Duration::from_secs(config.backoff.max_secs),
            auto_disable_threshold: crawler.auto_disable_threshold,
            shutdown_grace: crawler.shutdown_grace(),
            run_timeout: crawler
                .run_timeout_minutes
                .map(|m| Duration::from_secs(m * 60)),
            propagation_path: None,
        }
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.threads == 0 {
            return Err(OrchestratorError::InvalidOptions(
                "threads must be at least 1".to_string(),
            ));
        }
        if self.host_timeout.is_zero() {
            return Err(OrchestratorError::InvalidOptions(
                "host timeout must be positive".to_string(),
            ));
        }
        if self.fraction.is_some() && (self.start_id.is_some() || self.stop_id.is_some()) {
            return Err(OrchestratorError::InvalidOptions(
                "a fraction cannot be combined with a start/stop id range".to_string(),
            ));
        }
        if let (Some(start), Some(stop)) = (self.start_id, self.stop_id) {
            if start > stop {
                return Err(OrchestratorError::InvalidOptions(format!(
                    "start id {} is after stop id {}",
                    start, stop
                )));
            }
        }
        if let Some(path) = &self.propagation_path {
            if path.trim_matches('/').is_empty() {
                return Err(OrchestratorError::InvalidOptions(
                    "propagation path must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn host_filter(&self) -> HostFilter {
        HostFilter {
            start_id: self.start_id,
            stop_id: self.stop_id,
            include_private: self.include_private,
        }
    }

    pub fn crawl_settings(&self) -> CrawlSettings {
        CrawlSettings {
            mode: self.mode,
            categories: self.categories.clone(),
            host_budget: self.host_timeout,
            rsync_timeout: self.rsync_timeout,
            backoff_initial: self.backoff_initial,
            backoff_max: self.backoff_max,
        }
    }

    pub fn is_propagation(&self) -> bool {
        self.propagation_path.is_some()
    }
}

/// Result of one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostResult {
    pub host_id: i64,
    pub host: String,
    pub outcome: HostOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub stats: SyncStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagation: Option<PropagationStatus>,
    /// The host's writes could not be committed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_error: Option<String>,
}

/// Aggregate result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub mode: CrawlMode,
    /// Hosts selected for the run.
    pub selected: usize,
    pub results: Vec<HostResult>,
    pub stats: SyncStats,
    /// Stopped by shutdown or the run deadline before every host finished.
    pub interrupted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagation_path: Option<String>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    fn count_class(&self, class: OutcomeClass) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.class() == class)
            .count()
    }

    pub fn succeeded(&self) -> usize {
        self.count_class(OutcomeClass::Success)
    }

    pub fn failed(&self) -> usize {
        self.count_class(OutcomeClass::Failure)
    }

    pub fn neutral(&self) -> usize {
        self.count_class(OutcomeClass::Neutral)
    }

    pub fn outcome_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for result in &self.results {
            *counts.entry(result.outcome.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn propagation_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for status in self.results.iter().filter_map(|r| r.propagation) {
            *counts.entry(status.as_str().to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn failures(&self) -> Vec<HostFailure> {
        self.results
            .iter()
            .filter(|r| r.outcome.class() == OutcomeClass::Failure)
            .map(|r| HostFailure {
                host_id: r.host_id,
                host: r.host.clone(),
                outcome: r.outcome.as_str().to_string(),
                detail: r.detail.clone(),
            })
            .collect()
    }

    pub fn summary_line(&self) -> String {
        let outcomes = self
            .outcome_counts()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        let mut line = format!(
            "{} hosts: {} succeeded, {} failed, {} neutral [{}]; directories: {} up2date, {} not up2date, {} unchanged, {} unknown, {} created, {} demoted",
            self.total(),
            self.succeeded(),
            self.failed(),
            self.neutral(),
            outcomes,
            self.stats.up2date,
            self.stats.not_up2date,
            self.stats.unchanged,
            self.stats.unknown,
            self.stats.created,
            self.stats.demoted_missing,
        );
        if let Some(path) = &self.propagation_path {
            let counts = self
                .propagation_counts()
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(" ");
            line.push_str(&format!("; propagation of {}: [{}]", path, counts));
        }
        if self.interrupted {
            line.push_str(" (interrupted)");
        }
        line
    }
}
