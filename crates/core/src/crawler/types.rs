use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::RegistryError;

/// What a run does with each host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlMode {
    /// rsync pass plus per-directory fallback over every tracked directory.
    Full,
    /// Base URL reachability only.
    Canary,
    /// Per-directory probing of metadata subfolders only.
    RepodataOnly,
}

impl CrawlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Canary => "canary",
            Self::RepodataOnly => "repodata",
        }
    }

    /// Canary and repodata passes are too partial to judge unvisited directories
    /// or to say how long a full crawl takes.
    pub fn is_lightweight(&self) -> bool {
        !matches!(self, Self::Full)
    }
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict on one directory of one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    UpToDate,
    Stale,
    Unknown,
}

impl Freshness {
    /// The `up2date` value this verdict asks for, `None` for unknown.
    pub fn as_flag(self) -> Option<bool> {
        match self {
            Self::UpToDate => Some(true),
            Self::Stale => Some(false),
            Self::Unknown => None,
        }
    }

    pub fn is_definite(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Verdict on one directory, with what reconciliation needs to know about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryVerdict {
    pub directory_id: i64,
    /// Path relative to the category topdir.
    pub path: String,
    pub readable: bool,
    pub repodata: bool,
    pub freshness: Freshness,
}

/// Result of scanning one host category.
#[derive(Debug, Clone, Default)]
pub struct CategoryScan {
    pub host_category_id: i64,
    pub category: String,
    pub total_directories: usize,
    pub verdicts: Vec<DirectoryVerdict>,
    /// The rsync listing came back without a single usable entry.
    pub rsync_empty: bool,
}

/// What scanning a category amounted to.
#[derive(Debug, Clone)]
pub enum CategoryOutcome {
    /// No URL, or every base URL failed.
    Unreachable,
    /// Base check passed; canary mode stops here.
    Reachable,
    Scanned(CategoryScan),
}

/// Conditions that end a host crawl before all categories were looked at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostAbort {
    #[error("host budget exhausted after {}s", .elapsed.as_secs())]
    Timeout { elapsed: Duration },

    #[error("crawl interrupted by shutdown")]
    Interrupted,

    #[error("host is in {country} ({continent}), outside the selected continents")]
    WrongContinent { country: String, continent: String },

    #[error("host is in embargoed country {country}")]
    Embargoed { country: String },

    #[error("geolocation failed: {0}")]
    GeoLookupFailed(String),

    #[error("{0}")]
    Fatal(String),
}

impl From<RegistryError> for HostAbort {
    fn from(e: RegistryError) -> Self {
        Self::Fatal(format!("registry: {}", e))
    }
}

/// Terminal classification of one host crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostOutcome {
    Success,
    AllCategoriesUnreachable,
    CanaryAllFailed,
    NoCategoriesConfigured,
    Timeout,
    WrongContinent,
    Embargoed { country: String },
    GeoLookupFailed,
    Interrupted,
    UnhandledError,
}

/// How an outcome counts in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeClass {
    Success,
    Failure,
    Neutral,
}

impl HostOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::AllCategoriesUnreachable => "all_categories_unreachable",
            Self::CanaryAllFailed => "canary_all_failed",
            Self::NoCategoriesConfigured => "no_categories_configured",
            Self::Timeout => "timeout",
            Self::WrongContinent => "wrong_continent",
            Self::Embargoed { .. } => "embargoed",
            Self::GeoLookupFailed => "geo_lookup_failed",
            Self::Interrupted => "interrupted",
            Self::UnhandledError => "unhandled_error",
        }
    }

    pub fn class(&self) -> OutcomeClass {
        match self {
            Self::Success => OutcomeClass::Success,
            Self::NoCategoriesConfigured | Self::WrongContinent | Self::Interrupted => {
                OutcomeClass::Neutral
            }
            _ => OutcomeClass::Failure,
        }
    }

    /// Host-fatal outcomes move the consecutive-failure counter.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            Self::AllCategoriesUnreachable
                | Self::CanaryAllFailed
                | Self::Timeout
                | Self::GeoLookupFailed
                | Self::UnhandledError
        )
    }
}

impl fmt::Display for HostOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HostAbort> for HostOutcome {
    fn from(abort: HostAbort) -> Self {
        match abort {
            HostAbort::Timeout { .. } => Self::Timeout,
            HostAbort::Interrupted => Self::Interrupted,
            HostAbort::WrongContinent { .. } => Self::WrongContinent,
            HostAbort::Embargoed { country } => Self::Embargoed { country },
            HostAbort::GeoLookupFailed(_) => Self::GeoLookupFailed,
            HostAbort::Fatal(_) => Self::UnhandledError,
        }
    }
}

/// Everything a host crawl found, before policy and reconciliation.
#[derive(Debug, Clone)]
pub struct HostCrawlReport {
    pub outcome: HostOutcome,
    /// Human-readable context for failures.
    pub detail: Option<String>,
    pub scans: Vec<CategoryScan>,
    /// Reason to flag every directory of the host stale, found while scanning.
    pub flag_reason: Option<String>,
    pub elapsed: Duration,
}

/// Per-run crawl settings shared by every host.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub mode: CrawlMode,
    /// Category names to crawl; empty means all of a host's categories.
    pub categories: Vec<String>,
    pub host_budget: Duration,
    pub rsync_timeout: Option<Duration>,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            mode: CrawlMode::Full,
            categories: Vec::new(),
            host_budget: Duration::from_secs(120 * 60),
            rsync_timeout: None,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }
}
