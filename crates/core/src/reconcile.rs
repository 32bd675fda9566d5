//! Merge a host's directory verdicts into its persisted freshness records.
//!
//! Reconciliation is pure: it reads a snapshot of the existing records and
//! returns the writes to apply. Records are only ever created or updated.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::crawler::{CategoryScan, CrawlMode};
use crate::registry::{DirUpdate, HostCategoryDir, NewHostCategoryDir};

/// Per-host (or aggregated) reconciliation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub total_directories: usize,
    /// Records that became up to date.
    pub up2date: usize,
    /// Records that became stale.
    pub not_up2date: usize,
    pub unchanged: usize,
    /// Unvisited records skipped because their directory is unreadable.
    pub unreadable: usize,
    pub unknown: usize,
    pub created: usize,
    /// Unvisited records demoted because the mirror no longer has them.
    pub demoted_missing: usize,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl SyncStats {
    pub fn merge(&mut self, other: &SyncStats) {
        self.total_directories += other.total_directories;
        self.up2date += other.up2date;
        self.not_up2date += other.not_up2date;
        self.unchanged += other.unchanged;
        self.unreadable += other.unreadable;
        self.unknown += other.unknown;
        self.created += other.created;
        self.demoted_missing += other.demoted_missing;
        self.duration += other.duration;
    }

    /// Number of records whose flag changes.
    pub fn transitions(&self) -> usize {
        self.up2date + self.not_up2date + self.demoted_missing
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Registry writes produced by reconciliation.
#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    pub creates: Vec<NewHostCategoryDir>,
    pub updates: Vec<DirUpdate>,
    pub stats: SyncStats,
}

/// Compute the writes for the scanned categories of one host.
///
/// `existing` maps host category ids to their current records. Unknown verdicts
/// never touch a record. Outside lightweight modes, records of scanned categories
/// that no verdict visited are demoted unless their directory is unreadable.
pub fn reconcile(
    scans: &[CategoryScan],
    existing: &HashMap<i64, Vec<HostCategoryDir>>,
    mode: CrawlMode,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let empty = Vec::new();

    for scan in scans {
        let records = existing.get(&scan.host_category_id).unwrap_or(&empty);
        let by_path: HashMap<&str, &HostCategoryDir> =
            records.iter().map(|r| (r.path.as_str(), r)).collect();
        let mut visited: HashSet<i64> = HashSet::new();
        plan.stats.total_directories += scan.total_directories;

        for verdict in &scan.verdicts {
            let record = by_path.get(verdict.path.as_str()).copied();
            if let Some(record) = record {
                visited.insert(record.id);
            }

            let Some(flag) = verdict.freshness.as_flag() else {
                plan.stats.unknown += 1;
                continue;
            };

            match record {
                None if !flag => {
                    // Never materialize records for directories the mirror does not carry.
                    plan.stats.unchanged += 1;
                }
                None if mode == CrawlMode::RepodataOnly && !verdict.repodata => {
                    plan.stats.unchanged += 1;
                }
                None => {
                    plan.creates.push(NewHostCategoryDir {
                        host_category_id: scan.host_category_id,
                        path: verdict.path.clone(),
                        directory_id: verdict.directory_id,
                        up2date: true,
                    });
                    plan.stats.created += 1;
                }
                Some(record) if record.up2date != flag => {
                    plan.updates.push(DirUpdate {
                        id: record.id,
                        up2date: flag,
                    });
                    if flag {
                        plan.stats.up2date += 1;
                    } else {
                        info!(category = %scan.category, path = %verdict.path, "Directory is not up to date");
                        plan.stats.not_up2date += 1;
                    }
                }
                Some(_) => plan.stats.unchanged += 1,
            }
        }

        if mode.is_lightweight() {
            continue;
        }

        for record in records.iter().filter(|r| !visited.contains(&r.id)) {
            if record.directory_readable == Some(false) {
                plan.stats.unreadable += 1;
            } else if record.up2date {
                debug!(category = %scan.category, path = %record.path, "Demoting directory missing from this pass");
                plan.updates.push(DirUpdate {
                    id: record.id,
                    up2date: false,
                });
                plan.stats.demoted_missing += 1;
            }
        }
    }

    plan
}

/// Apply a plan to an in-memory snapshot, as the registry would.
pub fn apply_to_snapshot(
    existing: &mut HashMap<i64, Vec<HostCategoryDir>>,
    plan: &ReconcilePlan,
) {
    for update in &plan.updates {
        for record in existing.values_mut().flatten() {
            if record.id == update.id {
                record.up2date = update.up2date;
            }
        }
    }
    let mut next_id = existing
        .values()
        .flatten()
        .map(|r| r.id)
        .max()
        .unwrap_or(0);
    for create in &plan.creates {
        next_id += 1;
        existing
            .entry(create.host_category_id)
            .or_default()
            .push(HostCategoryDir {
                id: next_id,
                host_category_id: create.host_category_id,
                path: create.path.clone(),
                up2date: create.up2date,
                directory_id: Some(create.directory_id),
                directory_readable: Some(true),
            });
    }
}

/// Every record of the host set stale, as the host-wide flag does before a plan is applied.
pub fn mark_all_stale(existing: &mut HashMap<i64, Vec<HostCategoryDir>>) {
    for record in existing.values_mut().flatten() {
        record.up2date = false;
    }
}
