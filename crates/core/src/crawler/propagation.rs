//! Propagation check: how old is the metadata a mirror serves for one repository?

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{HostAbort, HostSession};
use crate::probe::{join_url, Scheme};
use crate::registry::{HostCategory, MirrorRegistry, REPODATA_DIR, REPOMD_FILE};

/// Checksums older than this are not considered.
const LOOKBACK_DAYS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationStatus {
    SameDay,
    OneDay,
    TwoDay,
    Older,
    NoInfo,
}

impl PropagationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SameDay => "same_day",
            Self::OneDay => "one_day",
            Self::TwoDay => "two_day",
            Self::Older => "older",
            Self::NoInfo => "no_info",
        }
    }
}

/// Midnight UTC of the day `now` falls in.
pub fn midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Bucket the age of a checksum record relative to `midnight`.
pub fn age_bucket(midnight: DateTime<Utc>, recorded: i64) -> PropagationStatus {
    let Some(recorded) = DateTime::<Utc>::from_timestamp(recorded, 0) else {
        return PropagationStatus::NoInfo;
    };
    let age = midnight - recorded;
    if age > ChronoDuration::days(3) {
        PropagationStatus::Older
    } else if age > ChronoDuration::days(2) {
        PropagationStatus::TwoDay
    } else if age > ChronoDuration::days(1) {
        PropagationStatus::OneDay
    } else {
        PropagationStatus::SameDay
    }
}

fn http_base(hc: &HostCategory) -> Option<&str> {
    hc.urls
        .iter()
        .map(|u| u.url.as_str())
        .find(|url| Scheme::of(url).is_some_and(|s| s.is_http()))
}

/// Check how far behind the host's copy of `<path>/repodata/repomd.xml` is.
///
/// Reads the registry and the mirror; writes nothing.
pub async fn check_propagation(
    registry: &dyn MirrorRegistry,
    session: &HostSession,
    path: &str,
    now: DateTime<Utc>,
) -> Result<PropagationStatus, HostAbort> {
    let path = path.trim_matches('/');
    let repodata_path = format!("{}/{}", path, REPODATA_DIR);

    let mut found = None;
    for hc in registry.host_categories(session.host_id())? {
        session.check()?;
        let topdir = hc.category.topdir.trim_end_matches('/');
        let name = if topdir.is_empty() {
            repodata_path.clone()
        } else {
            format!("{}/{}", topdir, repodata_path)
        };
        if let Some(directory) = registry.directory_by_name(&name)? {
            found = Some((hc, directory));
            break;
        }
    }
    let Some((hc, directory)) = found else {
        info!(path, "No category of this host carries the repository");
        return Ok(PropagationStatus::NoInfo);
    };

    let Some(base) = http_base(&hc) else {
        warn!(category = %hc.category.name, "No HTTP(S) URL to check propagation with");
        return Ok(PropagationStatus::NoInfo);
    };
    if registry
        .latest_file_detail(directory.id, REPOMD_FILE)?
        .is_none()
    {
        warn!(directory = %directory.name, "No checksum history for the metadata index");
        return Ok(PropagationStatus::NoInfo);
    }

    session.check()?;
    let url = join_url(base, &format!("{}/{}", repodata_path, REPOMD_FILE));
    let checksum = match session.prober().fetch_sha256(&url).await {
        Ok(checksum) => checksum,
        Err(e) => {
            info!(url = %url, error = %e, "Could not fetch the metadata index");
            return Ok(PropagationStatus::NoInfo);
        }
    };

    let today = midnight(now);
    let since = (today - ChronoDuration::days(LOOKBACK_DAYS)).timestamp();
    let status = match registry.file_detail_with_checksum(directory.id, REPOMD_FILE, &checksum, since)? {
        Some(detail) => age_bucket(today, detail.timestamp),
        None => PropagationStatus::Older,
    };
    debug!(url = %url, status = status.as_str(), "Propagation checked");
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 17, 45, 3).unwrap();
        assert_eq!(midnight(now), Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_age_buckets() {
        let today = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        let hours_before = |h: i64| (today - ChronoDuration::hours(h)).timestamp();

        assert_eq!(age_bucket(today, hours_before(-5)), PropagationStatus::SameDay);
        assert_eq!(age_bucket(today, hours_before(20)), PropagationStatus::SameDay);
        assert_eq!(age_bucket(today, hours_before(24)), PropagationStatus::SameDay);
        assert_eq!(age_bucket(today, hours_before(30)), PropagationStatus::OneDay);
        assert_eq!(age_bucket(today, hours_before(50)), PropagationStatus::TwoDay);
        assert_eq!(age_bucket(today, hours_before(80)), PropagationStatus::Older);
    }
}
