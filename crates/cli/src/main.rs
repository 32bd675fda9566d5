use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mirrorcrawl_core::{
    create_notification_system, load_config, validate_config, Config, ContinentFilter,
    CountryContinents, CrawlMetrics, CrawlMode, CrawlOrchestrator, Fraction, GeoGate, GeoLocator,
    HostLogs, LogSink, MaxMindLocator, MirrorRegistry, NetworkProberFactory, NotificationSink,
    ProbeSettings, RunOptions, SqliteRegistry, WebhookSink,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "mirrorcrawl")]
#[command(about = "Verify which directories each mirror carries up to date")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(
        long,
        env = "MIRRORCRAWL_CONFIG",
        default_value = "/etc/mirrorcrawl/config.toml",
        global = true
    )]
    config: PathBuf,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    debug: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Hosts crawled concurrently
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Per-host crawl budget in minutes
    #[arg(long, global = true)]
    timeout_minutes: Option<u64>,

    /// First host id to crawl
    #[arg(long, global = true)]
    startid: Option<i64>,

    /// Last host id to crawl
    #[arg(long, global = true)]
    stopid: Option<i64>,

    /// Crawl slice p of n of the selected hosts, e.g. 2:4
    #[arg(long, global = true)]
    fraction: Option<Fraction>,

    /// Also crawl private hosts
    #[arg(long, global = true)]
    include_private: bool,

    /// Continent to crawl, or ^XX to skip one; replaces the configured list
    #[arg(long, global = true)]
    continent: Vec<String>,

    /// Only crawl this category
    #[arg(long, global = true)]
    category: Vec<String>,

    /// Print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the selected hosts and record what they carry
    Crawl {
        /// Only check that each category's base URL answers
        #[arg(long, conflicts_with = "repodata")]
        canary: bool,

        /// Only check metadata directories
        #[arg(long)]
        repodata: bool,
    },

    /// Report how far behind each host is for one repository
    Propagation {
        /// Repository path below the category topdir, e.g. updates/40/Everything/x86_64/os
        #[arg(long)]
        path: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {:#}", e);
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    apply_overrides(&mut config, &cli);
    validate_config(&config).context("Configuration validation failed")?;

    let host_logs = config.logging.host_log_dir.as_ref().map(|_| HostLogs::new());
    init_logging(&cli, host_logs.as_ref());

    info!(version = VERSION, config = ?cli.config, "mirrorcrawl starting");
    info!("Database path: {:?}", config.database.path);

    let options = run_options(&config, &cli);
    options.validate().context("Invalid run options")?;

    let registry = Arc::new(
        SqliteRegistry::new(&config.database.path).context("Failed to open the registry")?,
    );
    let probers = Arc::new(NetworkProberFactory::new(ProbeSettings::from(&config.crawler)));

    let mut orchestrator = CrawlOrchestrator::new(registry.clone(), probers, options);

    if let Some(gate) = build_geo_gate(&config, registry.as_ref())? {
        orchestrator = orchestrator.with_geo(gate);
    }

    let metrics = match &config.metrics.textfile_path {
        Some(_) => Some(CrawlMetrics::new().context("Failed to register metrics")?),
        None => None,
    };
    if let Some(metrics) = &metrics {
        orchestrator = orchestrator.with_metrics(metrics.clone());
    }

    if let (Some(logs), Some(dir)) = (&host_logs, &config.logging.host_log_dir) {
        info!("Host logs go to {:?}", dir);
        orchestrator = orchestrator.with_host_logs(logs.clone(), dir.clone());
    }

    let writer_handle = if config.notify.enabled {
        let sink: Arc<dyn NotificationSink> = match &config.notify.webhook_url {
            Some(url) => {
                info!(url = %url, "Delivering notifications to webhook");
                Arc::new(
                    WebhookSink::new(
                        url.clone(),
                        std::time::Duration::from_secs(config.notify.webhook_timeout_secs),
                    )
                    .context("Failed to create the webhook client")?,
                )
            }
            None => Arc::new(LogSink),
        };
        let (handle, writer) = create_notification_system(sink, config.notify.buffer_size);
        orchestrator = orchestrator.with_notifications(handle);
        Some(tokio::spawn(writer.run()))
    } else {
        None
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            warn!("Shutdown requested, no new hosts will be started");
            cancel.cancel();
        }
    });

    let summary = orchestrator.run(cancel).await.context("Crawl run failed")?;

    // The writer stops once every handle is gone.
    drop(orchestrator);
    if let Some(writer_handle) = writer_handle {
        if let Err(e) = writer_handle.await {
            warn!(error = %e, "Notification writer did not finish cleanly");
        }
    }

    if let (Some(metrics), Some(path)) = (&metrics, &config.metrics.textfile_path) {
        match metrics.write_textfile(path).await {
            Ok(()) => info!("Metrics written to {:?}", path),
            Err(e) => warn!(error = %e, "Failed to write the metrics textfile"),
        }
    }

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to encode the summary")?
        );
    } else {
        println!("{}", summary.summary_line());
    }
    Ok(())
}

fn init_logging(cli: &Cli, host_logs: Option<&HostLogs>) {
    let default_level = if cli.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = cli.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with(host_logs.map(HostLogs::layer))
        .init();
}

/// Command-line values that replace configured ones.
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(threads) = cli.threads {
        config.crawler.threads = threads;
    }
    if let Some(minutes) = cli.timeout_minutes {
        config.crawler.host_timeout_minutes = minutes;
    }
    if cli.include_private {
        config.crawler.include_private = true;
    }
    if !cli.continent.is_empty() {
        config.geo.continents = cli.continent.clone();
    }
}

fn run_options(config: &Config, cli: &Cli) -> RunOptions {
    let mut options = RunOptions::from_config(config);
    options.start_id = cli.startid;
    options.stop_id = cli.stopid;
    options.fraction = cli.fraction;
    options.categories = cli.category.clone();
    match &cli.command {
        Commands::Crawl { canary: true, .. } => options.mode = CrawlMode::Canary,
        Commands::Crawl { repodata: true, .. } => options.mode = CrawlMode::RepodataOnly,
        Commands::Crawl { .. } => options.mode = CrawlMode::Full,
        Commands::Propagation { path } => options.propagation_path = Some(path.clone()),
    }
    options
}

/// The continent and embargo gate, when either is configured.
fn build_geo_gate(config: &Config, registry: &dyn MirrorRegistry) -> Result<Option<GeoGate>> {
    let filter = ContinentFilter::parse(&config.geo.continents)
        .map_err(anyhow::Error::msg)
        .context("Invalid continent filter")?;
    if !filter.is_active() && config.geo.embargoed_countries.is_empty() {
        return Ok(None);
    }

    let locator: Arc<dyn GeoLocator> = match &config.geo.database_path {
        Some(path) => {
            info!("Geolocation database: {:?}", path);
            Arc::new(MaxMindLocator::open(path).context("Failed to open the geolocation database")?)
        }
        None => {
            warn!("No geolocation database configured, every host counts as the default country");
            Arc::new(MaxMindLocator::without_database())
        }
    };
    let redirects = registry
        .continent_redirects()
        .context("Failed to load continent redirects")?;

    Ok(Some(GeoGate::new(
        locator,
        filter,
        &config.geo.embargoed_countries,
        CountryContinents::new(&redirects),
    )
    .with_resolve_timeout(config.crawler.probe_timeout())))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
