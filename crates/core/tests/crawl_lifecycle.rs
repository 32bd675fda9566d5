//! Crawl lifecycle integration tests.
//!
//! These tests drive the orchestrator against an on-disk registry and scripted
//! probers, then check what ended up persisted for each host:
//! selection -> crawl -> outcome policy -> reconciliation -> commit

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use mirrorcrawl_core::{
    geo::{ContinentFilter, CountryContinents, GeoGate},
    probe::{ProbeError, ProbeVerdict},
    registry::{Host, ManifestEntry, MirrorRegistry, SqliteRegistry},
    testing::{
        fixtures::{self, SeededMirror},
        MockGeoLocator, MockProber, MockProberFactory, ProbeCall,
    },
    Config, CrawlMode, CrawlOrchestrator, HostOutcome, OutcomePolicy, RunOptions, RunSummary,
};

const TOPDIR: &str = "pub/fedora/linux";
const CATEGORY: &str = "Fedora Linux";

fn http_base(host: &str) -> String {
    format!("http://{}/{}", host, TOPDIR)
}

fn base_check(host: &str) -> String {
    format!("{}/", http_base(host))
}

fn rsync_base(host: &str) -> String {
    format!("rsync://{}/fedora-linux", host)
}

fn file_url(host: &str, path: &str) -> String {
    format!("{}/{}", http_base(host), path)
}

fn ftp_base(host: &str) -> String {
    format!("ftp://{}/{}", host, TOPDIR)
}

fn ftp_url(host: &str, path: &str) -> String {
    format!("{}/{}", ftp_base(host), path)
}

fn server_error(url: &str) -> ProbeError {
    ProbeError::ServerError {
        status: 500,
        url: url.to_string(),
    }
}

/// Test helper to create all dependencies for crawl testing.
struct TestHarness {
    registry: Arc<SqliteRegistry>,
    probers: Arc<MockProberFactory>,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("registry.db");
        let registry = Arc::new(SqliteRegistry::new(&db_path).expect("Failed to create registry"));

        Self {
            registry,
            probers: Arc::new(MockProberFactory::new()),
            _temp_dir: temp_dir,
        }
    }

    fn options(&self, mode: CrawlMode) -> RunOptions {
        RunOptions {
            mode,
            threads: 2,
            host_timeout: Duration::from_secs(600),
            shutdown_grace: Duration::from_secs(5),
            ..RunOptions::from_config(&Config::default())
        }
    }

    fn orchestrator(&self, options: RunOptions) -> CrawlOrchestrator {
        CrawlOrchestrator::new(self.registry.clone(), self.probers.clone(), options)
    }

    async fn run(&self, options: RunOptions) -> RunSummary {
        self.orchestrator(options)
            .run(CancellationToken::new())
            .await
            .expect("Run failed")
    }

    /// Seed a host at the given base URLs and give it a scripted prober.
    fn mirror(&self, name: &str, urls: &[&str], prober: MockProber) -> (SeededMirror, Arc<MockProber>) {
        let seeded =
            fixtures::seed_mirror(&self.registry, name, CATEGORY, urls).expect("Failed to seed");
        let prober = Arc::new(prober);
        self.probers.insert(seeded.host_id, prober.clone());
        (seeded, prober)
    }

    /// Add a directory below the category topdir.
    fn directory(&self, path: &str, readable: bool, files: &[ManifestEntry]) -> i64 {
        self.registry
            .add_directory(&format!("{}/{}", TOPDIR, path), readable, files)
            .expect("Failed to add directory")
    }

    fn record(&self, mirror: &SeededMirror, path: &str, directory_id: i64, up2date: bool) {
        self.registry
            .add_host_category_dir(mirror.host_category_id, path, Some(directory_id), up2date)
            .expect("Failed to add host category dir");
    }

    /// `path -> up2date` of every record of the mirror.
    fn records(&self, mirror: &SeededMirror) -> HashMap<String, bool> {
        self.registry
            .host_category_dirs(mirror.host_category_id)
            .expect("Failed to read records")
            .into_iter()
            .map(|r| (r.path, r.up2date))
            .collect()
    }

    fn host(&self, mirror: &SeededMirror) -> Host {
        self.registry
            .get_host(mirror.host_id)
            .expect("Failed to read host")
            .expect("Host not found")
    }
}

fn outcome_of(summary: &RunSummary, host_id: i64) -> HostOutcome {
    summary
        .results
        .iter()
        .find(|r| r.host_id == host_id)
        .map(|r| r.outcome.clone())
        .expect("Host missing from summary")
}

#[tokio::test]
async fn test_unknown_verdicts_create_nothing_and_are_idempotent() {
    let harness = TestHarness::new();
    let host = "mirror.example.org";
    harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let (mirror, _) = harness.mirror(
        host,
        &[&http_base(host)],
        MockProber::new()
            .with_check(&base_check(host), ProbeVerdict::Exists)
            .with_check(&file_url(host, "releases/40/a.rpm"), ProbeVerdict::Unknown),
    );

    for _ in 0..2 {
        let summary = harness.run(harness.options(CrawlMode::Full)).await;
        assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::Success);
        assert_eq!(summary.stats.unknown, 1);
        assert_eq!(summary.stats.created, 0);
        assert!(harness.records(&mirror).is_empty());
    }

    let host = harness.host(&mirror);
    assert_eq!(host.crawl_failures, 0);
    assert!(host.last_crawled.is_some());
    assert!(host.last_crawl_duration.is_some());
}

#[tokio::test]
async fn test_rsync_pass_creates_records_and_backfills_ancestors() {
    let harness = TestHarness::new();
    let host = "mirror.example.org";
    harness.directory("releases", true, &[]);
    harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let (mirror, prober) = harness.mirror(
        host,
        &[&rsync_base(host), &http_base(host)],
        MockProber::new()
            .with_check(&base_check(host), ProbeVerdict::Exists)
            .with_rsync(
                &rsync_base(host),
                fixtures::rsync_files(&[("releases/40/a.rpm", 100)], true),
            ),
    );

    let summary = harness.run(harness.options(CrawlMode::Full)).await;

    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::Success);
    assert_eq!(summary.stats.created, 2);
    let records = harness.records(&mirror);
    assert_eq!(records.get("releases"), Some(&true));
    assert_eq!(records.get("releases/40"), Some(&true));
    // Settled by rsync, so no per-file probing
    assert_eq!(prober.calls_to(&file_url(host, "releases/40/a.rpm")), 0);
}

#[tokio::test]
async fn test_rsync_size_mismatch_marks_stale() {
    let harness = TestHarness::new();
    let host = "mirror.example.org";
    let dir = harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let (mirror, _) = harness.mirror(
        host,
        &[&rsync_base(host), &http_base(host)],
        MockProber::new()
            .with_check(&base_check(host), ProbeVerdict::Exists)
            .with_rsync(
                &rsync_base(host),
                fixtures::rsync_files(&[("releases/40/a.rpm", 99)], true),
            ),
    );
    harness.record(&mirror, "releases/40", dir, true);

    let summary = harness.run(harness.options(CrawlMode::Full)).await;

    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::Success);
    assert_eq!(summary.stats.not_up2date, 1);
    assert_eq!(harness.records(&mirror).get("releases/40"), Some(&false));
}

#[tokio::test]
async fn test_partial_rsync_leaves_missing_entries_unknown() {
    let harness = TestHarness::new();
    let a = harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let b = harness.directory("releases/41", true, &[fixtures::file("b.rpm", 200)]);
    let listing = |complete| fixtures::rsync_files(&[("releases/40/a.rpm", 100)], complete);

    let partial_host = "one.example.org";
    let (partial, _) = harness.mirror(
        partial_host,
        &[&rsync_base(partial_host), &http_base(partial_host)],
        MockProber::new()
            .with_check(&base_check(partial_host), ProbeVerdict::Exists)
            .with_check(&file_url(partial_host, "releases/41/b.rpm"), ProbeVerdict::Unknown)
            .with_rsync(&rsync_base(partial_host), listing(false)),
    );
    let complete_host = "two.example.org";
    let (complete, _) = harness.mirror(
        complete_host,
        &[&rsync_base(complete_host), &http_base(complete_host)],
        MockProber::new()
            .with_check(&base_check(complete_host), ProbeVerdict::Exists)
            .with_rsync(&rsync_base(complete_host), listing(true)),
    );
    for mirror in [&partial, &complete] {
        harness.record(mirror, "releases/40", a, true);
        harness.record(mirror, "releases/41", b, true);
    }

    harness.run(harness.options(CrawlMode::Full)).await;

    let records = harness.records(&partial);
    assert_eq!(records.get("releases/40"), Some(&true));
    assert_eq!(records.get("releases/41"), Some(&true));

    let records = harness.records(&complete);
    assert_eq!(records.get("releases/40"), Some(&true));
    assert_eq!(records.get("releases/41"), Some(&false));
}

#[tokio::test]
async fn test_empty_rsync_listing_flags_host_stale() {
    let harness = TestHarness::new();
    let host = "mirror.example.org";
    let dir = harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let (mirror, _) = harness.mirror(
        host,
        &[&rsync_base(host), &http_base(host)],
        MockProber::new()
            .with_check(&base_check(host), ProbeVerdict::Exists)
            .with_check(&file_url(host, "releases/40/a.rpm"), ProbeVerdict::Unknown)
            .with_rsync(&rsync_base(host), fixtures::rsync_files(&[], true)),
    );
    harness.record(&mirror, "releases/40", dir, true);

    let summary = harness.run(harness.options(CrawlMode::Full)).await;

    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::Success);
    assert_eq!(harness.records(&mirror).get("releases/40"), Some(&false));
    assert_eq!(harness.host(&mirror).crawl_failures, 0);
}

#[tokio::test]
async fn test_http_fallback_and_unreadable_directories() {
    let harness = TestHarness::new();
    let host = "mirror.example.org";
    harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let hidden = harness.directory("private/40", false, &[fixtures::file("p.rpm", 300)]);
    let (mirror, prober) = harness.mirror(
        host,
        &[&http_base(host)],
        MockProber::new()
            .with_check(&base_check(host), ProbeVerdict::Exists)
            .with_check(&file_url(host, "releases/40/a.rpm"), ProbeVerdict::Exists)
            .with_check(&file_url(host, "private/40/p.rpm"), ProbeVerdict::Absent),
    );
    harness.record(&mirror, "private/40", hidden, true);

    let summary = harness.run(harness.options(CrawlMode::Full)).await;

    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::Success);
    let records = harness.records(&mirror);
    assert_eq!(records.get("releases/40"), Some(&true));
    // A negative answer for an unreadable directory says nothing
    assert_eq!(records.get("private/40"), Some(&true));
    assert_eq!(summary.stats.unknown, 1);

    let hidden_checks: Vec<bool> = prober
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ProbeCall::Check { url, readable, .. } if url.ends_with("p.rpm") => Some(readable),
            _ => None,
        })
        .collect();
    assert_eq!(hidden_checks, vec![false]);
}

#[tokio::test]
async fn test_full_crawl_demotes_records_missing_from_the_tree() {
    let harness = TestHarness::new();
    let host = "mirror.example.org";
    harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let retired = harness.directory("releases/38", true, &[]);
    let (mirror, _) = harness.mirror(
        host,
        &[&http_base(host)],
        MockProber::new()
            .with_check(&base_check(host), ProbeVerdict::Exists)
            .with_check(&file_url(host, "releases/40/a.rpm"), ProbeVerdict::Exists),
    );
    // A record whose path no longer matches any tracked directory
    harness.record(&mirror, "releases/37", retired, true);

    let summary = harness.run(harness.options(CrawlMode::Full)).await;

    assert_eq!(summary.stats.demoted_missing, 1);
    let records = harness.records(&mirror);
    assert_eq!(records.get("releases/37"), Some(&false));
    assert_eq!(records.get("releases/40"), Some(&true));
}

#[tokio::test]
async fn test_consecutive_failures_disable_host() {
    let harness = TestHarness::new();
    let host = "mirror.example.org";
    let (mirror, _) = harness.mirror(
        host,
        &[&http_base(host)],
        MockProber::new().with_check_error(
            &base_check(host),
            ProbeError::Connection("connection refused".to_string()),
        ),
    );
    let options = RunOptions {
        auto_disable_threshold: 2,
        ..harness.options(CrawlMode::Full)
    };

    let summary = harness.run(options.clone()).await;
    assert_eq!(
        outcome_of(&summary, mirror.host_id),
        HostOutcome::AllCategoriesUnreachable
    );
    let after_first = harness.host(&mirror);
    assert_eq!(after_first.crawl_failures, 1);
    assert!(after_first.user_active);

    harness.run(options.clone()).await;
    let after_second = harness.host(&mirror);
    assert_eq!(after_second.crawl_failures, 2);
    assert!(!after_second.user_active);
    assert_eq!(
        after_second.disable_reason,
        Some(OutcomePolicy::new(2).disable_reason())
    );

    // Disabled hosts are no longer selected
    let summary = harness.run(options).await;
    assert_eq!(summary.total(), 0);
}

#[tokio::test]
async fn test_success_resets_failure_counter() {
    let harness = TestHarness::new();
    let host = "mirror.example.org";
    let refused = || ProbeError::Connection("connection refused".to_string());
    let (mirror, _) = harness.mirror(
        host,
        &[&http_base(host)],
        MockProber::new()
            .with_check_error(&base_check(host), refused())
            .with_check_error(&base_check(host), refused())
            .with_check(&base_check(host), ProbeVerdict::Exists),
    );

    harness.run(harness.options(CrawlMode::Full)).await;
    harness.run(harness.options(CrawlMode::Full)).await;
    assert_eq!(harness.host(&mirror).crawl_failures, 2);

    let summary = harness.run(harness.options(CrawlMode::Full)).await;
    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::Success);
    let host = harness.host(&mirror);
    assert_eq!(host.crawl_failures, 0);
    assert!(host.user_active);
}

#[tokio::test]
async fn test_wrong_continent_leaves_host_untouched() {
    let harness = TestHarness::new();
    let host = "mirror.example.jp";
    let dir = harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let (mirror, prober) = harness.mirror(
        host,
        &[&http_base(host)],
        MockProber::new().with_check(&base_check(host), ProbeVerdict::Exists),
    );
    harness.record(&mirror, "releases/40", dir, true);

    let locator = MockGeoLocator::new()
        .with_host(host, &["192.0.2.10"])
        .with_country("192.0.2.10", "JP");
    let filter = ContinentFilter::parse(&["EU".to_string()]).unwrap();
    let gate = GeoGate::new(Arc::new(locator), filter, &[], CountryContinents::new(&[]));

    let summary = harness
        .orchestrator(harness.options(CrawlMode::Full))
        .with_geo(gate)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::WrongContinent);
    assert_eq!(summary.neutral(), 1);
    assert!(prober.calls().is_empty());

    let host = harness.host(&mirror);
    assert_eq!(host.crawl_failures, 0);
    assert!(host.last_crawled.is_none());
    assert_eq!(harness.records(&mirror).get("releases/40"), Some(&true));
}

#[tokio::test]
async fn test_embargoed_host_is_disabled() {
    let harness = TestHarness::new();
    let host = "mirror.example.kp";
    let (mirror, prober) = harness.mirror(
        host,
        &[&http_base(host)],
        MockProber::new().with_check(&base_check(host), ProbeVerdict::Exists),
    );

    let locator = MockGeoLocator::new()
        .with_host(host, &["192.0.2.20"])
        .with_country("192.0.2.20", "KP");
    let gate = GeoGate::new(
        Arc::new(locator),
        ContinentFilter::disabled(),
        &["KP".to_string()],
        CountryContinents::new(&[]),
    );

    let summary = harness
        .orchestrator(harness.options(CrawlMode::Full))
        .with_geo(gate)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome_of(&summary, mirror.host_id),
        HostOutcome::Embargoed {
            country: "KP".to_string()
        }
    );
    assert!(prober.calls().is_empty());

    let host = harness.host(&mirror);
    assert!(!host.user_active);
    assert_eq!(host.disable_reason.as_deref(), Some("Embargoed country: KP"));
    assert_eq!(host.crawl_failures, 0);
}

#[tokio::test]
async fn test_canary_failure_flags_host_and_counts() {
    let harness = TestHarness::new();
    let host = "mirror.example.org";
    let dir = harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let (mirror, _) = harness.mirror(
        host,
        &[&http_base(host)],
        MockProber::new().with_check(&base_check(host), ProbeVerdict::Absent),
    );
    harness.record(&mirror, "releases/40", dir, true);

    let summary = harness.run(harness.options(CrawlMode::Canary)).await;

    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::CanaryAllFailed);
    assert_eq!(harness.records(&mirror).get("releases/40"), Some(&false));
    let host = harness.host(&mirror);
    assert_eq!(host.crawl_failures, 1);
    assert!(host.last_crawled.is_some());
    assert!(host.last_crawl_duration.is_none());
}

#[tokio::test]
async fn test_canary_success_probes_only_base_urls() {
    let harness = TestHarness::new();
    let host = "mirror.example.org";
    let dir = harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let (mirror, prober) = harness.mirror(
        host,
        &[&http_base(host)],
        MockProber::new().with_check(&base_check(host), ProbeVerdict::Exists),
    );
    harness.record(&mirror, "releases/40", dir, false);

    let summary = harness.run(harness.options(CrawlMode::Canary)).await;

    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::Success);
    assert_eq!(prober.calls().len(), 1);
    assert_eq!(harness.records(&mirror).get("releases/40"), Some(&false));
    let host = harness.host(&mirror);
    assert!(host.last_crawled.is_some());
    assert!(host.last_crawl_duration.is_none());
}

#[tokio::test]
async fn test_repodata_mode_checks_only_metadata_directories() {
    let harness = TestHarness::new();
    let host = "mirror.example.org";
    let os = "releases/40/Everything/x86_64/os";
    let repodata = format!("{}/repodata", os);
    harness.directory(os, true, &[fixtures::file("a.rpm", 100)]);
    let repodata_id = harness.directory(&repodata, true, &[fixtures::file("repomd.xml", 500)]);
    harness
        .registry
        .add_file_detail(repodata_id, "repomd.xml", 1_700_000_000, Some(500), Some("aaa"))
        .unwrap();

    let repomd_url = file_url(host, &format!("{}/repomd.xml", repodata));
    let (mirror, prober) = harness.mirror(
        host,
        &[&http_base(host)],
        MockProber::new()
            .with_check(&base_check(host), ProbeVerdict::Exists)
            .with_check(&repomd_url, ProbeVerdict::Exists)
            .with_sha256(&repomd_url, "AAA"),
    );

    let summary = harness.run(harness.options(CrawlMode::RepodataOnly)).await;

    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::Success);
    let records = harness.records(&mirror);
    assert_eq!(records.len(), 1);
    assert_eq!(records.get(repodata.as_str()), Some(&true));
    assert_eq!(prober.calls_to(&file_url(host, &format!("{}/a.rpm", os))), 0);
    assert_eq!(prober.calls_to(&repomd_url), 2);
    assert!(harness.host(&mirror).last_crawl_duration.is_none());
}

#[tokio::test]
async fn test_metadata_checksum_drift_marks_stale() {
    let harness = TestHarness::new();
    let host = "mirror.example.org";
    let repodata = "releases/40/Everything/x86_64/os/repodata";
    let dir = harness.directory(repodata, true, &[fixtures::file("repomd.xml", 500)]);
    harness
        .registry
        .add_file_detail(dir, "repomd.xml", 1_700_000_000, Some(500), Some("aaa"))
        .unwrap();

    let repomd_url = file_url(host, &format!("{}/repomd.xml", repodata));
    let (mirror, _) = harness.mirror(
        host,
        &[&http_base(host)],
        MockProber::new()
            .with_check(&base_check(host), ProbeVerdict::Exists)
            .with_check(&repomd_url, ProbeVerdict::Exists)
            .with_sha256(&repomd_url, "bbb"),
    );
    harness.record(&mirror, repodata, dir, true);

    harness.run(harness.options(CrawlMode::Full)).await;

    assert_eq!(harness.records(&mirror).get(repodata), Some(&false));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_flags_host_and_records_duration() {
    let harness = TestHarness::new();
    let host = "slow.example.org";
    let dir = harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let (mirror, _) = harness.mirror(
        host,
        &[&http_base(host)],
        MockProber::new()
            .with_check(&base_check(host), ProbeVerdict::Exists)
            .with_check(&file_url(host, "releases/40/a.rpm"), ProbeVerdict::Exists)
            .with_delay(Duration::from_secs(90)),
    );
    harness.record(&mirror, "releases/40", dir, true);

    let options = RunOptions {
        host_timeout: Duration::from_secs(60),
        ..harness.options(CrawlMode::Full)
    };
    let summary = harness.run(options).await;

    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::Timeout);
    assert_eq!(harness.records(&mirror).get("releases/40"), Some(&false));
    let host = harness.host(&mirror);
    assert_eq!(host.crawl_failures, 1);
    assert!(host.last_crawl_duration.unwrap_or(0) >= 60);
}

#[tokio::test]
async fn test_panicking_crawl_becomes_unhandled_error() {
    let harness = TestHarness::new();
    let host = "buggy.example.org";
    let dir = harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let (mirror, _) = harness.mirror(
        host,
        &[&http_base(host)],
        MockProber::new().with_panic_on(&base_check(host)),
    );
    harness.record(&mirror, "releases/40", dir, true);

    let summary = harness.run(harness.options(CrawlMode::Full)).await;

    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::UnhandledError);
    let result = &summary.results[0];
    assert!(result.detail.as_deref().unwrap_or("").contains("scripted panic"));
    assert_eq!(harness.records(&mirror).get("releases/40"), Some(&false));
    assert_eq!(harness.host(&mirror).crawl_failures, 1);
}

#[tokio::test]
async fn test_host_without_categories_is_neutral() {
    let harness = TestHarness::new();
    let site = harness.registry.add_site("bare site", false).unwrap();
    let host_id = harness
        .registry
        .add_host(site, "bare.example.org", false)
        .unwrap();

    let summary = harness.run(harness.options(CrawlMode::Full)).await;

    assert_eq!(outcome_of(&summary, host_id), HostOutcome::NoCategoriesConfigured);
    assert_eq!(summary.neutral(), 1);
    let host = harness.registry.get_host(host_id).unwrap().unwrap();
    assert!(host.last_crawled.is_some());
    assert!(host.last_crawl_duration.is_none());
    assert_eq!(host.crawl_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_is_checked_between_file_probes() {
    let harness = TestHarness::new();
    let host = "slow.example.org";
    let files: Vec<ManifestEntry> = (0..20)
        .map(|i| fixtures::file(&format!("pkg-{:02}.rpm", i), 100))
        .collect();
    let dir = harness.directory("releases/40", true, &files);
    let mut prober = MockProber::new()
        .with_check(&base_check(host), ProbeVerdict::Exists)
        .with_delay(Duration::from_millis(250));
    for file in &files {
        prober = prober.with_check(
            &file_url(host, &format!("releases/40/{}", file.name)),
            ProbeVerdict::Exists,
        );
    }
    let (mirror, prober) = harness.mirror(host, &[&http_base(host)], prober);
    harness.record(&mirror, "releases/40", dir, true);

    let options = RunOptions {
        host_timeout: Duration::from_secs(1),
        ..harness.options(CrawlMode::Full)
    };
    let started = tokio::time::Instant::now();
    let summary = harness.run(options).await;

    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::Timeout);
    // Base check plus the few file probes that fit in the budget
    assert!(prober.calls().len() < 6, "{} probes", prober.calls().len());
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(harness.records(&mirror).get("releases/40"), Some(&false));
}

#[tokio::test(start_paused = true)]
async fn test_budget_spent_in_last_directory_is_a_timeout() {
    let harness = TestHarness::new();
    let host = "slow.example.org";
    harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let (mirror, _) = harness.mirror(
        host,
        &[&http_base(host)],
        MockProber::new()
            .with_check(&base_check(host), ProbeVerdict::Exists)
            .with_check(&file_url(host, "releases/40/a.rpm"), ProbeVerdict::Exists)
            .with_delay(Duration::from_secs(40)),
    );

    let options = RunOptions {
        host_timeout: Duration::from_secs(60),
        ..harness.options(CrawlMode::Full)
    };
    let summary = harness.run(options).await;

    // The only file probe started in budget but finished after it
    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::Timeout);
}

#[tokio::test(start_paused = true)]
async fn test_busy_server_is_retried_after_backoff() {
    let harness = TestHarness::new();
    let host = "busy.example.org";
    harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let rpm = file_url(host, "releases/40/a.rpm");
    let (mirror, prober) = harness.mirror(
        host,
        &[&http_base(host)],
        MockProber::new()
            .with_check(&base_check(host), ProbeVerdict::Exists)
            .with_check_error(&rpm, ProbeError::try_later("503 Service Unavailable"))
            .with_check(&rpm, ProbeVerdict::Exists),
    );

    let started = tokio::time::Instant::now();
    let summary = harness.run(harness.options(CrawlMode::Full)).await;

    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::Success);
    assert_eq!(prober.calls_to(&rpm), 2);
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(harness.records(&mirror).get("releases/40"), Some(&true));
    assert_eq!(harness.host(&mirror).crawl_failures, 0);
}

#[tokio::test]
async fn test_ftp_only_mirror_with_empty_listing_is_stale() {
    let harness = TestHarness::new();
    let host = "ftp.example.org";
    let dir = harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let (mirror, prober) = harness.mirror(
        host,
        &[&ftp_base(host)],
        MockProber::new()
            .with_listing(&ftp_base(host), &[("releases", 4096)])
            .with_listing(&ftp_url(host, "releases/40"), &[]),
    );
    harness.record(&mirror, "releases/40", dir, true);

    let summary = harness.run(harness.options(CrawlMode::Full)).await;

    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::Success);
    assert_eq!(harness.records(&mirror).get("releases/40"), Some(&false));
    // The listing settled it, so no per-file checks
    assert!(prober
        .calls()
        .iter()
        .all(|call| matches!(call, ProbeCall::List { .. })));
}

#[tokio::test]
async fn test_method_that_answered_goes_first_for_next_directory() {
    let harness = TestHarness::new();
    let host = "mirror.example.org";
    harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    harness.directory("releases/41", true, &[fixtures::file("b.rpm", 200)]);
    let (mirror, prober) = harness.mirror(
        host,
        &[&http_base(host), &ftp_base(host)],
        MockProber::new()
            .with_check(&base_check(host), ProbeVerdict::Exists)
            .with_listing_none(&ftp_url(host, "releases/40"))
            .with_check(&file_url(host, "releases/40/a.rpm"), ProbeVerdict::Exists)
            .with_check(&file_url(host, "releases/41/b.rpm"), ProbeVerdict::Exists),
    );

    let summary = harness.run(harness.options(CrawlMode::Full)).await;

    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::Success);
    assert_eq!(prober.calls_to(&ftp_url(host, "releases/40")), 1);
    assert_eq!(prober.calls_to(&ftp_url(host, "releases/41")), 0);
    let records = harness.records(&mirror);
    assert_eq!(records.get("releases/40"), Some(&true));
    assert_eq!(records.get("releases/41"), Some(&true));
}

#[tokio::test]
async fn test_server_errors_on_every_method_leave_record_untouched() {
    let harness = TestHarness::new();
    let host = "broken.example.org";
    let dir = harness.directory("releases/40", true, &[fixtures::file("a.rpm", 100)]);
    let http_rpm = file_url(host, "releases/40/a.rpm");
    let ftp_rpm = ftp_url(host, "releases/40/a.rpm");
    let ftp_dir = ftp_url(host, "releases/40");
    let (mirror, prober) = harness.mirror(
        host,
        &[&http_base(host), &ftp_base(host)],
        MockProber::new()
            .with_check(&base_check(host), ProbeVerdict::Exists)
            .with_list_error(&ftp_dir, server_error(&ftp_dir))
            .with_check_error(&http_rpm, server_error(&http_rpm))
            .with_check_error(&ftp_rpm, server_error(&ftp_rpm)),
    );
    harness.record(&mirror, "releases/40", dir, true);

    let summary = harness.run(harness.options(CrawlMode::Full)).await;

    assert_eq!(outcome_of(&summary, mirror.host_id), HostOutcome::Success);
    assert_eq!(summary.stats.unknown, 1);
    assert_eq!(harness.records(&mirror).get("releases/40"), Some(&true));
    // Not a busy answer, so every method is tried exactly once
    for url in [&ftp_dir, &http_rpm, &ftp_rpm] {
        assert_eq!(prober.calls_to(url), 1, "{}", url);
    }
    assert_eq!(harness.host(&mirror).crawl_failures, 0);
}
