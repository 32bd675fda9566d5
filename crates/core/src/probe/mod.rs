//! Protocol probes: HTTP(S), FTP and rsync behind one three-valued contract.

mod ftp;
mod http;
pub mod listing;
mod network;
mod rsync;
mod types;

pub use ftp::FtpProbe;
pub use http::{HttpProbe, MAX_REDIRECTS};
pub use network::{NetworkProber, NetworkProberFactory, ProbeSettings};
pub use rsync::RsyncRunner;
pub use types::*;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::registry::Host;

/// Everything the crawler asks of a mirror, for one host.
///
/// Implementations own their connection caches; they never touch the registry.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Does `url` exist (with `expected_size`, when given)? HTTP(S) and FTP.
    async fn check_url(
        &self,
        url: &str,
        expected_size: Option<u64>,
        readable: bool,
    ) -> Result<ProbeVerdict, ProbeError>;

    /// FTP directory listing; `Ok(None)` when the answer cannot be judged.
    async fn list_dir(
        &self,
        url: &str,
        readable: bool,
    ) -> Result<Option<RemoteListing>, ProbeError>;

    /// SHA-256 (lowercase hex) of the document at an HTTP(S) URL.
    async fn fetch_sha256(&self, url: &str) -> Result<String, ProbeError>;

    /// Recursive listing of an rsync URL, bounded by `timeout`.
    async fn rsync_listing(&self, url: &str, timeout: Duration)
        -> Result<RsyncListing, ProbeError>;

    /// Close cached connections, returning the errors met while doing so.
    async fn close(&self) -> Vec<ProbeError>;
}

/// Creates a fresh [`Prober`] per host, so hosts never share connections.
pub trait ProberFactory: Send + Sync {
    fn create(&self, host: &Host) -> Arc<dyn Prober>;
}
