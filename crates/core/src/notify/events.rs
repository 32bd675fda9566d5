use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crawler::{CrawlMode, PropagationStatus};
use crate::reconcile::SyncStats;

/// A host that ended its crawl with a failure outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFailure {
    pub host_id: i64,
    pub host: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Propagation status of one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPropagation {
    pub host_id: i64,
    pub host: String,
    pub status: PropagationStatus,
}

/// Operator notification events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CrawlEvent {
    #[serde(rename = "crawl.started")]
    CrawlStarted {
        run_id: String,
        mode: CrawlMode,
        hosts: usize,
    },

    #[serde(rename = "crawl.completed")]
    CrawlCompleted {
        run_id: String,
        mode: CrawlMode,
        total: usize,
        succeeded: usize,
        failed: usize,
        neutral: usize,
        /// Host count per outcome label.
        outcomes: BTreeMap<String, usize>,
        failures: Vec<HostFailure>,
        /// The run was stopped before every selected host was crawled.
        interrupted: bool,
        stats: SyncStats,
    },

    #[serde(rename = "host.failed")]
    HostFailed {
        host_id: i64,
        host: String,
        outcome: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
        consecutive_failures: u32,
    },

    #[serde(rename = "host.disabled")]
    HostDisabled {
        host_id: i64,
        host: String,
        reason: String,
    },

    #[serde(rename = "host.marked_not_up2date")]
    HostMarkedNotUp2date {
        host_id: i64,
        host: String,
        reason: String,
    },

    #[serde(rename = "propagation.completed")]
    PropagationCompleted {
        run_id: String,
        path: String,
        /// Host count per status label.
        counts: BTreeMap<String, usize>,
        hosts: Vec<HostPropagation>,
    },
}

impl CrawlEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CrawlStarted { .. } => "crawl.started",
            Self::CrawlCompleted { .. } => "crawl.completed",
            Self::HostFailed { .. } => "host.failed",
            Self::HostDisabled { .. } => "host.disabled",
            Self::HostMarkedNotUp2date { .. } => "host.marked_not_up2date",
            Self::PropagationCompleted { .. } => "propagation.completed",
        }
    }

    /// Host the event is about, if any.
    pub fn host_id(&self) -> Option<i64> {
        match self {
            Self::HostFailed { host_id, .. }
            | Self::HostDisabled { host_id, .. }
            | Self::HostMarkedNotUp2date { host_id, .. } => Some(*host_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_serialized_tag() {
        let event = CrawlEvent::HostDisabled {
            host_id: 7,
            host: "mirror.example.org".to_string(),
            reason: "too many failures".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
        assert_eq!(json["host_id"], 7);
    }

    #[test]
    fn test_serialize_deserialize_crawl_completed() {
        let event = CrawlEvent::CrawlCompleted {
            run_id: "run-1".to_string(),
            mode: CrawlMode::Full,
            total: 3,
            succeeded: 1,
            failed: 1,
            neutral: 1,
            outcomes: BTreeMap::from([("success".to_string(), 1), ("timeout".to_string(), 1)]),
            failures: vec![HostFailure {
                host_id: 2,
                host: "slow.example.org".to_string(),
                outcome: "timeout".to_string(),
                detail: None,
            }],
            interrupted: false,
            stats: SyncStats::default(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"crawl.completed\""));
        assert!(json.contains("\"mode\":\"full\""));
        assert!(!json.contains("detail"));

        let parsed: CrawlEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_host_id() {
        let started = CrawlEvent::CrawlStarted {
            run_id: "r".to_string(),
            mode: CrawlMode::Canary,
            hosts: 0,
        };
        assert_eq!(started.host_id(), None);

        let failed = CrawlEvent::HostFailed {
            host_id: 3,
            host: "h".to_string(),
            outcome: "timeout".to_string(),
            detail: Some("slow".to_string()),
            consecutive_failures: 2,
        };
        assert_eq!(failed.host_id(), Some(3));
        assert_eq!(failed.event_type(), "host.failed");
    }
}
