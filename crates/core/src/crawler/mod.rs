//! Host crawling: session budget, category strategy, propagation checks.

mod backoff;
mod host;
mod propagation;
mod session;
mod strategy;
mod types;

pub use backoff::Backoff;
pub use host::{HostCrawler, RSYNC_EMPTY_REASON};
pub use propagation::{age_bucket, check_propagation, midnight, PropagationStatus};
pub use session::HostSession;
pub use strategy::{
    compare_manifest, diff_rsync_listing, rsync_limit, CategoryEngine, CategoryUrls,
    ContinentCheck, FallbackMethod, MethodPreference, TrackedDir,
};
pub use types::*;
