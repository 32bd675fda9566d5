//! The production prober: real sockets and a real rsync binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{
    FtpProbe, HttpProbe, ProbeError, ProbeVerdict, Prober, ProberFactory, RemoteListing,
    RsyncListing, RsyncRunner, Scheme,
};
use crate::config::CrawlerConfig;
use crate::registry::Host;

/// Settings shared by every host's prober.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub user_agent: String,
    pub timeout: Duration,
    pub rsync_parameters: String,
    pub rsync_program: PathBuf,
}

impl From<&CrawlerConfig> for ProbeSettings {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            timeout: config.probe_timeout(),
            rsync_parameters: config.rsync_parameters.clone(),
            rsync_program: PathBuf::from("rsync"),
        }
    }
}

pub struct NetworkProber {
    http: HttpProbe,
    ftp: FtpProbe,
    rsync: RsyncRunner,
}

impl NetworkProber {
    pub fn new(settings: &ProbeSettings) -> Self {
        Self {
            http: HttpProbe::new(settings.user_agent.clone(), settings.timeout),
            ftp: FtpProbe::new(settings.timeout),
            rsync: RsyncRunner::new(&settings.rsync_parameters)
                .with_program(settings.rsync_program.clone()),
        }
    }
}

fn unsupported(what: &str, url: &str) -> ProbeError {
    ProbeError::Unsupported(format!("{} is not available for {}", what, url))
}

#[async_trait]
impl Prober for NetworkProber {
    async fn check_url(
        &self,
        url: &str,
        expected_size: Option<u64>,
        readable: bool,
    ) -> Result<ProbeVerdict, ProbeError> {
        match Scheme::of(url) {
            Some(scheme) if scheme.is_http() => {
                self.http.check(url, expected_size, readable).await
            }
            Some(Scheme::Ftp) => self.ftp.check_file(url, expected_size, readable).await,
            _ => Err(unsupported("existence check", url)),
        }
    }

    async fn list_dir(
        &self,
        url: &str,
        readable: bool,
    ) -> Result<Option<RemoteListing>, ProbeError> {
        match Scheme::of(url) {
            Some(Scheme::Ftp) => self.ftp.list_dir(url, readable).await,
            _ => Err(unsupported("directory listing", url)),
        }
    }

    async fn fetch_sha256(&self, url: &str) -> Result<String, ProbeError> {
        match Scheme::of(url) {
            Some(scheme) if scheme.is_http() => self.http.fetch_sha256(url).await,
            _ => Err(unsupported("checksum fetch", url)),
        }
    }

    async fn rsync_listing(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<RsyncListing, ProbeError> {
        match Scheme::of(url) {
            Some(Scheme::Rsync) => self.rsync.list(url, timeout).await,
            _ => Err(unsupported("rsync listing", url)),
        }
    }

    async fn close(&self) -> Vec<ProbeError> {
        self.http.close();
        self.ftp.close().await
    }
}

/// Builds one [`NetworkProber`] per host.
pub struct NetworkProberFactory {
    settings: ProbeSettings,
}

impl NetworkProberFactory {
    pub fn new(settings: ProbeSettings) -> Self {
        Self { settings }
    }
}

impl ProberFactory for NetworkProberFactory {
    fn create(&self, _host: &Host) -> Arc<dyn Prober> {
        Arc::new(NetworkProber::new(&self.settings))
    }
}
