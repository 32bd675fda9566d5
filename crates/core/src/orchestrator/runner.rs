//! Crawl orchestrator implementation.
//!
//! Hosts are dispatched to a bounded pool of workers, longest previous crawl
//! first. Each worker crawls one host inside a `host` span, commits the host's
//! writes in one transaction and reports a [`HostResult`].

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::crawler::{
    check_propagation, CrawlMode, HostCrawlReport, HostCrawler, HostOutcome, HostSession,
};
use crate::geo::GeoGate;
use crate::host_log::{HostLogs, HOST_SPAN};
use crate::metrics::CrawlMetrics;
use crate::notify::{CrawlEvent, HostPropagation, NotifyHandle};
use crate::policy::{OutcomePolicy, PolicyContext};
use crate::probe::ProberFactory;
use crate::reconcile::{mark_all_stale, reconcile, SyncStats};
use crate::registry::{Host, HostCommit, MirrorRegistry, RegistryError};

use super::types::{Fraction, HostResult, OrchestratorError, RunOptions, RunSummary};

/// How long interrupted hosts get to reach a checkpoint before their tasks are dropped.
const ABORT_DRAIN: Duration = Duration::from_secs(10);

/// Keep slice `part` of `of` contiguous slices of `hosts` by id, preserving order.
pub fn select_fraction(hosts: Vec<Host>, fraction: Fraction) -> Vec<Host> {
    let mut ids: Vec<i64> = hosts.iter().map(|h| h.id).collect();
    ids.sort_unstable();
    let start = (fraction.part - 1) * ids.len() / fraction.of;
    let end = fraction.part * ids.len() / fraction.of;
    let selected: std::collections::HashSet<i64> = ids[start..end].iter().copied().collect();
    hosts
        .into_iter()
        .filter(|h| selected.contains(&h.id))
        .collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Where per-host logs go.
#[derive(Clone)]
struct HostLogSink {
    logs: HostLogs,
    dir: PathBuf,
}

/// State shared by every worker of a run.
struct Worker {
    registry: Arc<dyn MirrorRegistry>,
    probers: Arc<dyn ProberFactory>,
    crawler: HostCrawler,
    policy: OutcomePolicy,
    mode: CrawlMode,
    propagation_path: Option<String>,
    notify: Option<NotifyHandle>,
    metrics: Option<CrawlMetrics>,
    host_logs: Option<HostLogSink>,
    finished: AtomicUsize,
    selected: usize,
}

/// Drives a crawl run over the selected hosts.
pub struct CrawlOrchestrator {
    registry: Arc<dyn MirrorRegistry>,
    probers: Arc<dyn ProberFactory>,
    options: RunOptions,
    geo: Option<GeoGate>,
    notify: Option<NotifyHandle>,
    metrics: Option<CrawlMetrics>,
    host_logs: Option<HostLogSink>,
    running: Arc<AtomicBool>,
}

impl CrawlOrchestrator {
    pub fn new(
        registry: Arc<dyn MirrorRegistry>,
        probers: Arc<dyn ProberFactory>,
        options: RunOptions,
    ) -> Self {
        Self {
            registry,
            probers,
            options,
            geo: None,
            notify: None,
            metrics: None,
            host_logs: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Continent filter and embargo checks.
    pub fn with_geo(mut self, gate: GeoGate) -> Self {
        self.geo = Some(gate);
        self
    }

    pub fn with_notifications(mut self, handle: NotifyHandle) -> Self {
        self.notify = Some(handle);
        self
    }

    pub fn with_metrics(mut self, metrics: CrawlMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Persist per-host logs captured by `logs` to `dir`.
    pub fn with_host_logs(mut self, logs: HostLogs, dir: impl Into<PathBuf>) -> Self {
        self.host_logs = Some(HostLogSink {
            logs,
            dir: dir.into(),
        });
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Crawl every selected host once.
    ///
    /// Cancelling `cancel` stops dispatch at once; hosts in flight get the
    /// shutdown grace period, then are interrupted at their next checkpoint.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary, OrchestratorError> {
        self.options.validate()?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::AlreadyRunning);
        }
        let result = self.run_inner(cancel).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    fn select_hosts(&self) -> Result<Vec<Host>, RegistryError> {
        let hosts = self.registry.list_hosts(&self.options.host_filter())?;
        Ok(match self.options.fraction {
            Some(fraction) => select_fraction(hosts, fraction),
            None => hosts,
        })
    }

    async fn run_inner(&self, cancel: CancellationToken) -> Result<RunSummary, OrchestratorError> {
        let hosts = self.select_hosts()?;
        let run_id = Uuid::new_v4().to_string();
        let mode = self.options.mode;
        info!(
            run_id = %run_id,
            mode = %mode,
            hosts = hosts.len(),
            threads = self.options.threads,
            propagation = ?self.options.propagation_path,
            "Starting crawl run"
        );
        if let Some(notify) = &self.notify {
            notify.try_emit(CrawlEvent::CrawlStarted {
                run_id: run_id.clone(),
                mode,
                hosts: hosts.len(),
            });
        }

        let worker = Arc::new(Worker {
            registry: self.registry.clone(),
            probers: self.probers.clone(),
            crawler: HostCrawler::new(
                self.registry.clone(),
                self.options.crawl_settings(),
                self.geo.clone(),
            ),
            policy: OutcomePolicy::new(self.options.auto_disable_threshold),
            mode,
            propagation_path: self.options.propagation_path.clone(),
            notify: self.notify.clone(),
            metrics: self.metrics.clone(),
            host_logs: self.host_logs.clone(),
            finished: AtomicUsize::new(0),
            selected: hosts.len(),
        });

        let stop = cancel.child_token();
        let deadline = self.options.run_timeout.map(|limit| {
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!(limit_secs = limit.as_secs(), "Run deadline reached, stopping dispatch");
                stop.cancel();
            })
        });

        let abort = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(self.options.threads));
        let mut tasks: JoinSet<HostResult> = JoinSet::new();
        let mut dispatched: HashMap<i64, Host> = HashMap::new();
        let mut results = Vec::with_capacity(hosts.len());
        let mut undispatched = false;

        for host in &hosts {
            let permit = tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    undispatched = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            dispatched.insert(host.id, host.clone());
            let worker = worker.clone();
            let host = host.clone();
            let abort = abort.clone();
            tasks.spawn(async move {
                let _permit = permit;
                worker.crawl_host(host, abort).await
            });
        }

        let forced = self.collect(&mut tasks, &stop, &abort, &mut results).await;
        if let Some(deadline) = deadline {
            deadline.abort();
        }

        // Hosts whose tasks were dropped never reported back.
        for result in &results {
            dispatched.remove(&result.host_id);
        }
        for host in dispatched.into_values() {
            warn!(host_id = host.id, host = %host.name, "Host crawl dropped after the grace period");
            if let Some(metrics) = &self.metrics {
                metrics.record_host(&HostOutcome::Interrupted, 0.0);
                metrics.host_finished();
            }
            results.push(HostResult {
                host_id: host.id,
                host: host.name,
                outcome: HostOutcome::Interrupted,
                detail: Some("dropped after the shutdown grace period".to_string()),
                stats: SyncStats::default(),
                propagation: None,
                commit_error: None,
            });
        }
        results.sort_by_key(|r| r.host_id);

        let mut stats = SyncStats::default();
        for result in &results {
            stats.merge(&result.stats);
        }
        let summary = RunSummary {
            run_id,
            mode,
            selected: hosts.len(),
            results,
            stats,
            interrupted: undispatched || forced || stop.is_cancelled(),
            propagation_path: self.options.propagation_path.clone(),
        };
        info!(summary = %summary.summary_line(), "Crawl run finished");

        if let Some(notify) = &self.notify {
            notify.try_emit(self.completion_event(&summary));
        }
        Ok(summary)
    }

    fn completion_event(&self, summary: &RunSummary) -> CrawlEvent {
        match &summary.propagation_path {
            Some(path) => CrawlEvent::PropagationCompleted {
                run_id: summary.run_id.clone(),
                path: path.clone(),
                counts: summary.propagation_counts(),
                hosts: summary
                    .results
                    .iter()
                    .filter_map(|r| {
                        r.propagation.map(|status| HostPropagation {
                            host_id: r.host_id,
                            host: r.host.clone(),
                            status,
                        })
                    })
                    .collect(),
            },
            None => CrawlEvent::CrawlCompleted {
                run_id: summary.run_id.clone(),
                mode: summary.mode,
                total: summary.total(),
                succeeded: summary.succeeded(),
                failed: summary.failed(),
                neutral: summary.neutral(),
                outcomes: summary.outcome_counts(),
                failures: summary.failures(),
                interrupted: summary.interrupted,
                stats: summary.stats.clone(),
            },
        }
    }

    /// Gather results until every task is done, enforcing the shutdown sequence.
    ///
    /// Returns true when tasks had to be interrupted or dropped.
    async fn collect(
        &self,
        tasks: &mut JoinSet<HostResult>,
        stop: &CancellationToken,
        abort: &CancellationToken,
        results: &mut Vec<HostResult>,
    ) -> bool {
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(joined) => push_joined(joined, results),
                    None => return false,
                },
                _ = stop.cancelled() => break,
            }
        }

        if tasks.is_empty() {
            return false;
        }
        info!(
            in_flight = tasks.len(),
            grace_secs = self.options.shutdown_grace.as_secs(),
            "Stop requested, waiting for hosts in flight"
        );
        if drain_until(tasks, results, self.options.shutdown_grace).await {
            return false;
        }

        warn!(in_flight = tasks.len(), "Grace period over, interrupting hosts in flight");
        abort.cancel();
        if drain_until(tasks, results, ABORT_DRAIN).await {
            return true;
        }

        tasks.abort_all();
        while let Some(joined) = tasks.join_next().await {
            push_joined(joined, results);
        }
        true
    }
}

/// Join tasks until the set is empty (true) or `limit` passes (false).
async fn drain_until(
    tasks: &mut JoinSet<HostResult>,
    results: &mut Vec<HostResult>,
    limit: Duration,
) -> bool {
    let timer = tokio::time::sleep(limit);
    tokio::pin!(timer);
    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                Some(joined) => push_joined(joined, results),
                None => return true,
            },
            _ = &mut timer => return false,
        }
    }
}

fn push_joined(joined: Result<HostResult, JoinError>, results: &mut Vec<HostResult>) {
    match joined {
        Ok(result) => results.push(result),
        Err(e) if e.is_cancelled() => debug!("Host task cancelled"),
        Err(e) => error!(error = %e, "Host task failed"),
    }
}

impl Worker {
    async fn crawl_host(self: Arc<Self>, host: Host, abort: CancellationToken) -> HostResult {
        if let Some(metrics) = &self.metrics {
            metrics.host_started();
        }

        let span = info_span!(HOST_SPAN, host_id = host.id, host = %host.name);
        let result = self
            .clone()
            .crawl_in_span(&host, abort)
            .instrument(span)
            .await;

        if let Some(sink) = &self.host_logs {
            if self.propagation_path.is_some() || result.outcome == HostOutcome::WrongContinent {
                sink.logs.discard(host.id);
            } else if let Err(e) = sink.logs.persist(&sink.dir, host.id).await {
                warn!(host_id = host.id, dir = %sink.dir.display(), error = %e, "Failed to write host log");
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.host_finished();
        }

        let finished = self.finished.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            host_id = host.id,
            host = %host.name,
            outcome = %result.outcome,
            progress = %format!("{}/{}", finished, self.selected),
            "Host finished"
        );
        result
    }

    async fn crawl_in_span(self: Arc<Self>, host: &Host, abort: CancellationToken) -> HostResult {
        info!("Starting crawl");
        let prober = self.probers.create(host);

        if let Some(path) = &self.propagation_path {
            let session = HostSession::new(
                host.id,
                prober,
                self.crawler.settings().host_budget,
                abort,
            );
            let checked = AssertUnwindSafe(check_propagation(
                self.registry.as_ref(),
                &session,
                path,
                Utc::now(),
            ))
            .catch_unwind()
            .await;
            session.close().await;
            let (outcome, detail, propagation) = match checked {
                Ok(Ok(status)) => (HostOutcome::Success, None, Some(status)),
                Ok(Err(abort)) => {
                    let detail = abort.to_string();
                    (HostOutcome::from(abort), Some(detail), None)
                }
                Err(panic) => (
                    HostOutcome::UnhandledError,
                    Some(panic_message(panic.as_ref())),
                    None,
                ),
            };
            return HostResult {
                host_id: host.id,
                host: host.name.clone(),
                outcome,
                detail,
                stats: SyncStats::default(),
                propagation,
                commit_error: None,
            };
        }

        let started = tokio::time::Instant::now();
        let report = match AssertUnwindSafe(self.crawler.crawl(host, prober, abort))
            .catch_unwind()
            .await
        {
            Ok(report) => report,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(error = %message, "Host crawl panicked");
                HostCrawlReport {
                    outcome: HostOutcome::UnhandledError,
                    detail: Some(message),
                    scans: Vec::new(),
                    flag_reason: None,
                    elapsed: started.elapsed(),
                }
            }
        };

        self.finish(host, report)
    }

    /// Apply the policy, reconcile and commit.
    fn finish(&self, host: &Host, report: HostCrawlReport) -> HostResult {
        let ctx = PolicyContext {
            mode: self.mode,
            now: Utc::now(),
        };
        let decision = self.policy.decide(host, &report, &ctx);
        let mut stats = SyncStats {
            duration: report.elapsed,
            ..Default::default()
        };
        let mut commit_error = None;

        if !decision.is_noop() {
            let mut commit = HostCommit {
                host_id: host.id,
                mark_not_up2date: decision.mark_not_up2date.is_some(),
                host_update: decision.host_update.clone(),
                ..Default::default()
            };
            let planned = if decision.reconcile {
                self.plan(&report, commit.mark_not_up2date).map(|plan| {
                    commit.creates = plan.creates;
                    commit.updates = plan.updates;
                    stats = SyncStats {
                        duration: report.elapsed,
                        ..plan.stats
                    };
                })
            } else {
                Ok(())
            };

            let committed = planned.and_then(|()| self.registry.commit_host(&commit));
            match committed {
                Ok(()) => debug!(
                    creates = commit.creates.len(),
                    updates = commit.updates.len(),
                    "Host state committed"
                ),
                Err(e) => {
                    error!(error = %e, "Failed to commit host state");
                    commit_error = Some(e.to_string());
                }
            }
        } else {
            debug!(outcome = %report.outcome, "Nothing to persist");
        }

        if let Some(notify) = &self.notify {
            for event in decision.events {
                notify.try_emit(event);
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_host(&report.outcome, report.elapsed.as_secs_f64());
            metrics.record_stats(&stats);
        }

        HostResult {
            host_id: host.id,
            host: host.name.clone(),
            outcome: report.outcome,
            detail: report.detail,
            stats,
            propagation: None,
            commit_error,
        }
    }

    fn plan(
        &self,
        report: &HostCrawlReport,
        mark_not_up2date: bool,
    ) -> Result<crate::reconcile::ReconcilePlan, RegistryError> {
        let mut existing = HashMap::new();
        for scan in &report.scans {
            existing.insert(
                scan.host_category_id,
                self.registry.host_category_dirs(scan.host_category_id)?,
            );
        }
        if mark_not_up2date {
            mark_all_stale(&mut existing);
        }
        Ok(reconcile(&report.scans, &existing, self.mode))
    }
}
