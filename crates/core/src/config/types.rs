use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Registry database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("mirrorcrawl.db")
}

/// Crawler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CrawlerConfig {
    /// Number of hosts crawled concurrently.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Per-host crawl budget in minutes.
    #[serde(default = "default_host_timeout")]
    pub host_timeout_minutes: u64,
    /// Timeout for a single probe (connect + request). Must stay far below the host budget.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Upper bound for one rsync listing. The remaining host budget also applies.
    #[serde(default)]
    pub rsync_timeout_secs: Option<u64>,
    /// Extra arguments passed to rsync, whitespace separated.
    #[serde(default = "default_rsync_parameters")]
    pub rsync_parameters: String,
    /// Consecutive failures after which a host is disabled.
    #[serde(default = "default_auto_disable")]
    pub auto_disable_threshold: u32,
    #[serde(default)]
    pub include_private: bool,
    /// Grace period for in-flight hosts after a shutdown request.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Optional deadline for the whole run; reaching it behaves like a shutdown request.
    #[serde(default)]
    pub run_timeout_minutes: Option<u64>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            host_timeout_minutes: default_host_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            rsync_timeout_secs: None,
            rsync_parameters: default_rsync_parameters(),
            auto_disable_threshold: default_auto_disable(),
            include_private: false,
            shutdown_grace_secs: default_shutdown_grace(),
            user_agent: default_user_agent(),
            run_timeout_minutes: None,
        }
    }
}

impl CrawlerConfig {
    pub fn host_timeout(&self) -> Duration {
        Duration::from_secs(self.host_timeout_minutes * 60)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_threads() -> usize {
    10
}

fn default_host_timeout() -> u64 {
    120
}

fn default_probe_timeout() -> u64 {
    30
}

fn default_rsync_parameters() -> String {
    "--no-motd".to_string()
}

fn default_auto_disable() -> u32 {
    4
}

fn default_shutdown_grace() -> u64 {
    300
}

fn default_user_agent() -> String {
    format!("mirrorcrawl/{}", env!("CARGO_PKG_VERSION"))
}

/// Busy-server backoff configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial")]
    pub initial_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_secs: default_backoff_initial(),
            max_secs: default_backoff_max(),
        }
    }
}

fn default_backoff_initial() -> u64 {
    1
}

fn default_backoff_max() -> u64 {
    60
}

/// Geolocation and continent filtering
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GeoConfig {
    /// GeoLite2-Country database (.mmdb). Without it every host geolocates to the default country.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Continent codes to crawl; entries prefixed with `^` are excluded instead.
    #[serde(default)]
    pub continents: Vec<String>,
    /// ISO country codes whose mirrors get disabled on sight.
    #[serde(default)]
    pub embargoed_countries: Vec<String>,
}

/// Operator notification configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// POST target for notification JSON. Notifications are only logged when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notify_buffer")]
    pub buffer_size: usize,
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_url: None,
            buffer_size: default_notify_buffer(),
            webhook_timeout_secs: default_webhook_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_notify_buffer() -> usize {
    1000
}

fn default_webhook_timeout() -> u64 {
    10
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Directory receiving one log file per crawled host.
    #[serde(default)]
    pub host_log_dir: Option<PathBuf>,
}

/// Metrics export configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Prometheus textfile written at the end of each run.
    #[serde(default)]
    pub textfile_path: Option<PathBuf>,
}
