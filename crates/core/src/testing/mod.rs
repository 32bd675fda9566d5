//! Testing utilities and mock implementations.
//!
//! Mocks for the crawler's external collaborators, so crawls run end to end
//! without real mirrors, DNS or a webhook.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mirrorcrawl_core::probe::ProbeVerdict;
//! use mirrorcrawl_core::testing::{MockProber, MockProberFactory};
//!
//! let prober = Arc::new(
//!     MockProber::new().with_check("http://mirror.example.org/pub/", ProbeVerdict::Exists),
//! );
//! let factory = MockProberFactory::new().with_host(1, prober.clone());
//!
//! // Hand the factory to a CrawlOrchestrator...
//! ```

mod memory_sink;
mod mock_geo;
mod mock_prober;

pub use memory_sink::MemorySink;
pub use mock_geo::MockGeoLocator;
pub use mock_prober::{MockProber, MockProberFactory, ProbeCall};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::crawler::{CategoryScan, DirectoryVerdict, Freshness};
    use crate::probe::{EntryKind, RemoteEntry, RsyncListing};
    use crate::registry::{Host, ManifestEntry, RegistryError, SqliteRegistry};

    /// A host with reasonable defaults.
    pub fn host(id: i64, name: &str) -> Host {
        Host {
            id,
            site_id: 1,
            name: name.to_string(),
            private: false,
            admin_active: true,
            user_active: true,
            crawl_failures: 0,
            last_crawled: None,
            last_crawl_duration: None,
            disable_reason: None,
        }
    }

    /// A manifest entry with a fixed timestamp.
    pub fn file(name: &str, size: u64) -> ManifestEntry {
        ManifestEntry {
            name: name.to_string(),
            size,
            timestamp: 1_700_000_000,
        }
    }

    /// An rsync listing of plain files, `(path, size)`.
    pub fn rsync_files(files: &[(&str, u64)], complete: bool) -> RsyncListing {
        RsyncListing {
            entries: files
                .iter()
                .map(|(path, size)| {
                    (
                        path.to_string(),
                        RemoteEntry {
                            kind: EntryKind::File,
                            size: Some(*size),
                        },
                    )
                })
                .collect(),
            complete,
            exit_code: if complete { Some(0) } else { None },
        }
    }

    /// A single-category scan with the given verdicts.
    pub fn scan(host_category_id: i64, verdicts: &[(i64, &str, Freshness)]) -> CategoryScan {
        CategoryScan {
            host_category_id,
            category: "Fedora Linux".to_string(),
            total_directories: verdicts.len(),
            verdicts: verdicts
                .iter()
                .map(|(directory_id, path, freshness)| DirectoryVerdict {
                    directory_id: *directory_id,
                    path: path.to_string(),
                    readable: true,
                    repodata: path.ends_with("repodata"),
                    freshness: *freshness,
                })
                .collect(),
            rsync_empty: false,
        }
    }

    /// Ids of a seeded mirror: one site, host and category with base URLs.
    #[derive(Debug, Clone, Copy)]
    pub struct SeededMirror {
        pub site_id: i64,
        pub host_id: i64,
        pub category_id: i64,
        pub host_category_id: i64,
    }

    /// Seed a host carrying `category` (topdir `pub/fedora/linux`) at the given base URLs.
    ///
    /// Categories are shared by name, so several hosts can carry the same one.
    pub fn seed_mirror(
        registry: &SqliteRegistry,
        host_name: &str,
        category: &str,
        urls: &[&str],
    ) -> Result<SeededMirror, RegistryError> {
        let site_id = registry.add_site(&format!("{} site", host_name), false)?;
        let host_id = registry.add_host(site_id, host_name, false)?;
        let category_id = registry.add_category(category, "pub/fedora/linux")?;
        let host_category_id = registry.add_host_category(host_id, category_id, false)?;
        for url in urls {
            registry.add_host_category_url(host_category_id, url)?;
        }
        Ok(SeededMirror {
            site_id,
            host_id,
            category_id,
            host_category_id,
        })
    }
}
