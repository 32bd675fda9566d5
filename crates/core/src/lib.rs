pub mod config;
pub mod crawler;
pub mod geo;
pub mod host_log;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod policy;
pub mod probe;
pub mod reconcile;
pub mod registry;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, CrawlerConfig,
};
pub use crawler::{CrawlMode, Freshness, HostOutcome, PropagationStatus};
pub use geo::{ContinentFilter, CountryContinents, GeoGate, GeoLocator, MaxMindLocator};
pub use host_log::HostLogs;
pub use metrics::CrawlMetrics;
pub use notify::{
    create_notification_system, CrawlEvent, LogSink, NotificationSink, NotifyHandle, WebhookSink,
};
pub use orchestrator::{
    CrawlOrchestrator, Fraction, HostResult, OrchestratorError, RunOptions, RunSummary,
};
pub use policy::OutcomePolicy;
pub use probe::{NetworkProberFactory, ProbeSettings, Prober, ProberFactory};
pub use reconcile::SyncStats;
pub use registry::{MirrorRegistry, RegistryError, SqliteRegistry};
