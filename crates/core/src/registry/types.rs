//! Registry records consumed and updated by the crawler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the metadata subfolder used by repodata-only crawls.
pub const REPODATA_DIR: &str = "repodata";

/// Metadata index file whose checksum is compared on top of its size.
pub const REPOMD_FILE: &str = "repomd.xml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub name: String,
    pub private: bool,
    pub admin_active: bool,
    pub user_active: bool,
}

/// A mirror server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub site_id: i64,
    pub name: String,
    pub private: bool,
    pub admin_active: bool,
    pub user_active: bool,
    /// Consecutive whole-host crawl failures.
    pub crawl_failures: u32,
    pub last_crawled: Option<DateTime<Utc>>,
    /// Duration of the last crawl in seconds.
    pub last_crawl_duration: Option<i64>,
    pub disable_reason: Option<String>,
}

/// A top-level content tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    /// Path of the category root on the reference tree, e.g. `pub/fedora/linux`.
    pub topdir: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCategoryUrl {
    pub id: i64,
    pub host_category_id: i64,
    pub url: String,
    pub private: bool,
}

/// A host's claim to carry a category, with its base URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCategory {
    pub id: i64,
    pub host_id: i64,
    pub category: Category,
    pub always_up2date: bool,
    pub urls: Vec<HostCategoryUrl>,
}

/// One file of a directory manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub size: u64,
    /// Modification time, seconds since the epoch.
    pub timestamp: i64,
}

/// Reference-tree directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub id: i64,
    /// Full path on the reference tree.
    pub name: String,
    pub readable: bool,
    /// Most recent files of the directory, enough to judge freshness.
    pub files: Vec<ManifestEntry>,
}

impl Directory {
    /// Path of this directory below `topdir`, `""` for the category root itself.
    pub fn relative_path<'a>(&'a self, topdir: &str) -> Option<&'a str> {
        let topdir = topdir.trim_end_matches('/');
        if self.name == topdir {
            return Some("");
        }
        self.name
            .strip_prefix(topdir)
            .and_then(|rest| rest.strip_prefix('/'))
    }

    pub fn is_repodata(&self) -> bool {
        self.name
            .rsplit('/')
            .next()
            .is_some_and(|last| last == REPODATA_DIR)
    }
}

/// The crawler's per-directory freshness record for one host category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCategoryDir {
    pub id: i64,
    pub host_category_id: i64,
    /// Directory path relative to the category topdir.
    pub path: String,
    pub up2date: bool,
    pub directory_id: Option<i64>,
    /// Readability of the backing directory, `None` once it left the reference tree.
    pub directory_readable: Option<bool>,
}

/// Checksum history entry for a well-known file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDetail {
    pub id: i64,
    pub directory_id: i64,
    pub filename: String,
    /// Seconds since the epoch.
    pub timestamp: i64,
    pub size: Option<u64>,
    pub sha256: Option<String>,
}

/// Override of the geolocation country to continent mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinentRedirect {
    pub country: String,
    pub continent: String,
}

/// Host selection for a run.
#[derive(Debug, Clone, Default)]
pub struct HostFilter {
    pub start_id: Option<i64>,
    pub stop_id: Option<i64>,
    pub include_private: bool,
}

/// Absolute crawl metadata written back to a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostUpdate {
    pub crawl_failures: u32,
    pub user_active: bool,
    pub disable_reason: Option<String>,
    pub last_crawled: Option<DateTime<Utc>>,
    pub last_crawl_duration: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHostCategoryDir {
    pub host_category_id: i64,
    pub path: String,
    pub directory_id: i64,
    pub up2date: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirUpdate {
    pub id: i64,
    pub up2date: bool,
}

/// Every registry write produced by one host crawl, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct HostCommit {
    pub host_id: i64,
    /// Set every directory record of the host stale before applying `updates`.
    pub mark_not_up2date: bool,
    pub creates: Vec<NewHostCategoryDir>,
    pub updates: Vec<DirUpdate>,
    pub host_update: Option<HostUpdate>,
}

impl HostCommit {
    pub fn is_empty(&self) -> bool {
        !self.mark_not_up2date
            && self.creates.is_empty()
            && self.updates.is_empty()
            && self.host_update.is_none()
    }
}
