//! Mock geolocation for testing.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::geo::{GeoError, GeoLocator};

/// Mock implementation of the GeoLocator trait.
///
/// Hostnames resolve to the scripted addresses; anything else fails to resolve.
/// Addresses without a scripted country have no database answer.
#[derive(Debug, Default)]
pub struct MockGeoLocator {
    hosts: HashMap<String, Vec<IpAddr>>,
    countries: HashMap<IpAddr, String>,
    /// Every resolution takes this long.
    resolve_delay: Option<Duration>,
    resolutions: AtomicUsize,
}

impl MockGeoLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `hostname` to `addrs`. Invalid address strings are ignored.
    pub fn with_host(mut self, hostname: &str, addrs: &[&str]) -> Self {
        let addrs = addrs.iter().filter_map(|a| a.parse().ok()).collect();
        self.hosts.insert(hostname.to_ascii_lowercase(), addrs);
        self
    }

    pub fn with_country(mut self, addr: &str, country: &str) -> Self {
        if let Ok(ip) = addr.parse() {
            self.countries.insert(ip, country.to_string());
        }
        self
    }

    pub fn with_resolve_delay(mut self, delay: Duration) -> Self {
        self.resolve_delay = Some(delay);
        self
    }

    /// Number of `resolve` calls so far.
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl GeoLocator for MockGeoLocator {
    async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>, GeoError> {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.resolve_delay {
            tokio::time::sleep(delay).await;
        }
        self.hosts
            .get(&hostname.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| GeoError::Resolve {
                host: hostname.to_string(),
                message: "unknown host".to_string(),
            })
    }

    fn country(&self, ip: IpAddr) -> Option<String> {
        self.countries.get(&ip).cloned()
    }
}
