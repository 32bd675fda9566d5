use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Protocol of a host category base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scheme {
    Rsync,
    Http,
    Https,
    Ftp,
}

impl Scheme {
    pub fn of(url: &str) -> Option<Self> {
        let (scheme, _) = url.split_once("://")?;
        match scheme.to_ascii_lowercase().as_str() {
            "rsync" => Some(Self::Rsync),
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "ftp" => Some(Self::Ftp),
            _ => None,
        }
    }

    pub fn is_http(self) -> bool {
        matches!(self, Self::Http | Self::Https)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rsync => "rsync",
            Self::Http => "http",
            Self::Https => "https",
            Self::Ftp => "ftp",
        };
        f.write_str(s)
    }
}

/// Answer of a single existence probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// Present, and the size matches when one was expected.
    Exists,
    /// Missing, forbidden, or a size mismatch.
    Absent,
    /// The mirror's answer does not allow a judgement.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

impl EntryKind {
    /// Kind from the first character of a `ls -l` style permission string.
    pub fn from_mode(mode: &str) -> Self {
        match mode.chars().next() {
            Some('-') => Self::File,
            Some('d') => Self::Directory,
            Some('l') => Self::Symlink,
            _ => Self::Other,
        }
    }
}

/// One entry of a remote listing. `size` is `None` when the listing showed an unparsable size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteEntry {
    pub kind: EntryKind,
    pub size: Option<u64>,
}

/// Entry name (relative path for rsync) to entry.
pub type RemoteListing = BTreeMap<String, RemoteEntry>;

/// Result of a recursive rsync listing.
#[derive(Debug, Clone, Default)]
pub struct RsyncListing {
    pub entries: RemoteListing,
    /// False when the process was killed on timeout and `entries` holds partial output.
    pub complete: bool,
    pub exit_code: Option<i32>,
}

/// Probe-level failures. The strategy engine turns these into verdicts or backoff.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    /// Server busy, too many connections, or a login restriction that outlived its retry.
    #[error("server asked to try later: {reason}")]
    TryLater { reason: String },

    #[error("server error {status} for {url}")]
    ServerError { status: u16, url: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("probe timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ProbeError {
    pub fn try_later(reason: impl Into<String>) -> Self {
        Self::TryLater {
            reason: reason.into(),
        }
    }

    /// Whether the caller should back off and retry the same work.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TryLater { .. })
    }
}

/// Append a relative path to a base URL.
pub fn join_url(base: &str, relative: &str) -> String {
    let base = base.trim_end_matches('/');
    let relative = relative.trim_start_matches('/');
    if relative.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, relative)
    }
}
