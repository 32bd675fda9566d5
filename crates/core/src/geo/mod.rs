//! Geolocation of mirror hosts and continent filtering.

mod countries;
mod maxmind;

pub use maxmind::MaxMindLocator;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::registry::ContinentRedirect;

/// Continent codes as used by GeoIP, `--` standing for "no continent".
pub const CONTINENTS: [&str; 8] = ["AF", "AN", "AS", "EU", "NA", "OC", "SA", "--"];

/// Country assumed for hosts without any geolocated address.
pub const DEFAULT_COUNTRY: &str = "US";

/// Bound on one hostname resolution unless the gate is given another.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("cannot extract a hostname from {0}")]
    BadUrl(String),

    #[error("name resolution failed for {host}: {message}")]
    Resolve { host: String, message: String },

    #[error("geolocation database error: {0}")]
    Database(String),
}

/// Hostname resolution plus IP to country lookup.
#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>, GeoError>;

    /// ISO country code of an address, `None` when the database has no answer.
    fn country(&self, ip: IpAddr) -> Option<String>;
}

/// Continents a run is restricted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinentFilter {
    allowed: BTreeSet<&'static str>,
    active: bool,
}

impl ContinentFilter {
    /// Parse `["EU", "NA"]` (allow-list) or `["^AS"]` (exclusions), or a mix of both.
    ///
    /// An empty list disables the filter.
    pub fn parse(entries: &[String]) -> Result<Self, String> {
        let mut included = BTreeSet::new();
        let mut excluded = BTreeSet::new();
        for entry in entries {
            let entry = entry.trim();
            let (code, set) = match entry.strip_prefix('^') {
                Some(code) => (code, &mut excluded),
                None => (entry, &mut included),
            };
            let code = code.to_ascii_uppercase();
            let Some(known) = CONTINENTS.iter().find(|c| **c == code) else {
                return Err(format!(
                    "unknown continent '{}' (expected one of {})",
                    entry,
                    CONTINENTS.join(" ")
                ));
            };
            set.insert(*known);
        }

        let allowed = CONTINENTS
            .iter()
            .copied()
            .filter(|c| included.is_empty() || included.contains(c))
            .filter(|c| !excluded.contains(c))
            .collect();
        Ok(Self {
            allowed,
            active: !entries.is_empty(),
        })
    }

    /// The filter that lets everything through.
    pub fn disabled() -> Self {
        Self {
            allowed: CONTINENTS.iter().copied().collect(),
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn allows(&self, continent: &str) -> bool {
        !self.active || self.allowed.contains(continent)
    }
}

impl Default for ContinentFilter {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Country to continent table with the registry's redirects layered on top.
#[derive(Debug, Clone)]
pub struct CountryContinents {
    map: HashMap<String, String>,
}

impl CountryContinents {
    pub fn new(redirects: &[ContinentRedirect]) -> Self {
        let mut map: HashMap<String, String> = countries::COUNTRY_CONTINENTS
            .iter()
            .map(|(country, continent)| (country.to_string(), continent.to_string()))
            .collect();
        for redirect in redirects {
            map.insert(
                redirect.country.to_ascii_uppercase(),
                redirect.continent.to_ascii_uppercase(),
            );
        }
        Self { map }
    }

    pub fn continent_of(&self, country: &str) -> Option<&str> {
        self.map.get(&country.to_ascii_uppercase()).map(String::as_str)
    }
}

/// One-off lookup of a country's continent.
pub fn continent_for_country(country: &str, redirects: &[ContinentRedirect]) -> Option<String> {
    CountryContinents::new(redirects)
        .continent_of(country)
        .map(String::from)
}

/// Hostname of a base URL, port and IPv6 brackets stripped.
pub fn url_hostname(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.trim_start_matches('[').trim_end_matches(']').to_string())
}

/// Country of a hostname: the most common country across its addresses.
pub async fn locate_country(locator: &dyn GeoLocator, hostname: &str) -> Result<String, GeoError> {
    let addresses = locator.resolve(hostname).await?;

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for ip in addresses {
        if let Some(country) = locator.country(ip) {
            *counts.entry(country.to_ascii_uppercase()).or_default() += 1;
        }
    }

    // Ties go to the alphabetically first country.
    let best = counts
        .into_iter()
        .fold(None::<(String, usize)>, |best, (country, n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((country, n)),
        });
    Ok(best
        .map(|(country, _)| country)
        .unwrap_or_else(|| DEFAULT_COUNTRY.to_string()))
}

/// Where a host sits relative to the run's geographic restrictions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Allowed { country: String },
    WrongContinent { country: String, continent: String },
    Embargoed { country: String },
}

/// Continent and embargo checks for base URLs.
#[derive(Clone)]
pub struct GeoGate {
    locator: Arc<dyn GeoLocator>,
    filter: ContinentFilter,
    embargoed: HashSet<String>,
    continents: Arc<CountryContinents>,
    resolve_timeout: Duration,
}

impl GeoGate {
    pub fn new(
        locator: Arc<dyn GeoLocator>,
        filter: ContinentFilter,
        embargoed: &[String],
        continents: CountryContinents,
    ) -> Self {
        Self {
            locator,
            filter,
            embargoed: embargoed.iter().map(|c| c.to_ascii_uppercase()).collect(),
            continents: Arc::new(continents),
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    /// Give up on a hostname whose resolution takes longer than `limit`.
    pub fn with_resolve_timeout(mut self, limit: Duration) -> Self {
        self.resolve_timeout = limit;
        self
    }

    /// Whether checking costs anything; inactive gates allow every host without a lookup.
    pub fn is_active(&self) -> bool {
        self.filter.is_active() || !self.embargoed.is_empty()
    }

    pub async fn place(&self, url: &str) -> Result<Placement, GeoError> {
        let hostname = url_hostname(url).ok_or_else(|| GeoError::BadUrl(url.to_string()))?;
        let country = tokio::time::timeout(
            self.resolve_timeout,
            locate_country(self.locator.as_ref(), &hostname),
        )
        .await
        .map_err(|_| GeoError::Resolve {
            host: hostname.clone(),
            message: format!("timed out after {}s", self.resolve_timeout.as_secs()),
        })??;

        if self.embargoed.contains(&country) {
            return Ok(Placement::Embargoed { country });
        }

        let continent = self.continents.continent_of(&country).unwrap_or("--").to_string();
        if self.filter.allows(&continent) {
            Ok(Placement::Allowed { country })
        } else {
            Ok(Placement::WrongContinent { country, continent })
        }
    }
}
