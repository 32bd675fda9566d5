use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;
use maxminddb::{geoip2, Reader};
use tracing::debug;

use super::{GeoError, GeoLocator};

/// System resolver plus an optional GeoLite2-Country database.
///
/// Without a database every address is unknown and hosts fall back to the default country.
pub struct MaxMindLocator {
    reader: Option<Reader<Vec<u8>>>,
}

impl MaxMindLocator {
    pub fn open(path: &Path) -> Result<Self, GeoError> {
        let reader = Reader::open_readfile(path)
            .map_err(|e| GeoError::Database(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            reader: Some(reader),
        })
    }

    pub fn without_database() -> Self {
        Self { reader: None }
    }
}

#[async_trait]
impl GeoLocator for MaxMindLocator {
    async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>, GeoError> {
        let resolved = tokio::net::lookup_host((hostname, 0))
            .await
            .map_err(|e| GeoError::Resolve {
                host: hostname.to_string(),
                message: e.to_string(),
            })?;

        let mut addresses: Vec<IpAddr> = resolved.map(|addr| addr.ip()).collect();
        addresses.sort();
        addresses.dedup();
        if addresses.is_empty() {
            return Err(GeoError::Resolve {
                host: hostname.to_string(),
                message: "no addresses".to_string(),
            });
        }
        Ok(addresses)
    }

    fn country(&self, ip: IpAddr) -> Option<String> {
        let reader = self.reader.as_ref()?;
        match reader.lookup::<geoip2::Country>(ip) {
            Ok(record) => record
                .country
                .and_then(|country| country.iso_code)
                .map(str::to_string),
            Err(e) => {
                debug!(%ip, error = %e, "No country for address");
                None
            }
        }
    }
}
