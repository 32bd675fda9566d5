//! Mock prober for testing.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::probe::{
    EntryKind, ProbeError, ProbeVerdict, Prober, ProberFactory, RemoteEntry, RemoteListing,
    RsyncListing,
};
use crate::registry::Host;

/// A recorded prober call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeCall {
    Check {
        url: String,
        expected_size: Option<u64>,
        readable: bool,
    },
    List {
        url: String,
        readable: bool,
    },
    Sha256 {
        url: String,
    },
    Rsync {
        url: String,
        timeout: Duration,
    },
}

impl ProbeCall {
    pub fn url(&self) -> &str {
        match self {
            Self::Check { url, .. }
            | Self::List { url, .. }
            | Self::Sha256 { url }
            | Self::Rsync { url, .. } => url,
        }
    }
}

/// Scripted answers for one URL. The last answer repeats once the others are used up.
type Script<T> = HashMap<String, VecDeque<Result<T, ProbeError>>>;

fn next_answer<T: Clone>(script: &Mutex<Script<T>>, url: &str) -> Option<Result<T, ProbeError>> {
    let mut script = script.lock().unwrap();
    let answers = script.get_mut(url)?;
    if answers.len() > 1 {
        answers.pop_front()
    } else {
        answers.front().cloned()
    }
}

fn push_answer<T>(script: &Mutex<Script<T>>, url: &str, answer: Result<T, ProbeError>) {
    script
        .lock()
        .unwrap()
        .entry(url.to_string())
        .or_default()
        .push_back(answer);
}

fn unscripted(url: &str) -> ProbeError {
    ProbeError::Connection(format!("no answer scripted for {}", url))
}

/// Mock implementation of the Prober trait.
///
/// Answers are scripted per exact URL; anything unscripted fails with a
/// connection error, which the crawler treats as an unreachable URL.
///
/// # Example
///
/// ```rust,ignore
/// use mirrorcrawl_core::probe::ProbeVerdict;
/// use mirrorcrawl_core::testing::MockProber;
///
/// let prober = MockProber::new()
///     .with_check("http://mirror.example.org/pub/", ProbeVerdict::Exists)
///     .with_listing("ftp://mirror.example.org/pub/releases", &[("repomd.xml", 2048)]);
///
/// // Crawl with it, then inspect what was asked
/// assert_eq!(prober.calls_to("http://mirror.example.org/pub/"), 1);
/// ```
pub struct MockProber {
    checks: Mutex<Script<ProbeVerdict>>,
    listings: Mutex<Script<Option<RemoteListing>>>,
    checksums: Mutex<Script<String>>,
    rsync: Mutex<Script<RsyncListing>>,
    close_errors: RwLock<Vec<ProbeError>>,
    /// Every call takes this long.
    delay: RwLock<Option<Duration>>,
    /// Calls to this URL panic.
    panic_on: RwLock<Option<String>>,
    calls: Mutex<Vec<ProbeCall>>,
    close_calls: AtomicUsize,
}

impl Default for MockProber {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockProber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProber")
            .field("calls", &self.calls.lock().map(|c| c.len()).unwrap_or(0))
            .field("close_calls", &self.close_calls.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockProber {
    pub fn new() -> Self {
        Self {
            checks: Mutex::new(HashMap::new()),
            listings: Mutex::new(HashMap::new()),
            checksums: Mutex::new(HashMap::new()),
            rsync: Mutex::new(HashMap::new()),
            close_errors: RwLock::new(Vec::new()),
            delay: RwLock::new(None),
            panic_on: RwLock::new(None),
            calls: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// Answer `check_url(url)` with `verdict`. Repeated calls queue answers.
    pub fn with_check(self, url: &str, verdict: ProbeVerdict) -> Self {
        push_answer(&self.checks, url, Ok(verdict));
        self
    }

    pub fn with_check_error(self, url: &str, error: ProbeError) -> Self {
        push_answer(&self.checks, url, Err(error));
        self
    }

    /// Answer `list_dir(url)` with plain files of the given sizes.
    pub fn with_listing(self, url: &str, files: &[(&str, u64)]) -> Self {
        let listing = files
            .iter()
            .map(|(name, size)| {
                (
                    name.to_string(),
                    RemoteEntry {
                        kind: EntryKind::File,
                        size: Some(*size),
                    },
                )
            })
            .collect();
        push_answer(&self.listings, url, Ok(Some(listing)));
        self
    }

    pub fn with_listing_entries(self, url: &str, listing: RemoteListing) -> Self {
        push_answer(&self.listings, url, Ok(Some(listing)));
        self
    }

    /// `list_dir(url)` cannot judge the directory.
    pub fn with_listing_none(self, url: &str) -> Self {
        push_answer(&self.listings, url, Ok(None));
        self
    }

    pub fn with_list_error(self, url: &str, error: ProbeError) -> Self {
        push_answer(&self.listings, url, Err(error));
        self
    }

    pub fn with_sha256(self, url: &str, checksum: &str) -> Self {
        push_answer(&self.checksums, url, Ok(checksum.to_string()));
        self
    }

    pub fn with_sha256_error(self, url: &str, error: ProbeError) -> Self {
        push_answer(&self.checksums, url, Err(error));
        self
    }

    pub fn with_rsync(self, url: &str, listing: RsyncListing) -> Self {
        push_answer(&self.rsync, url, Ok(listing));
        self
    }

    pub fn with_rsync_error(self, url: &str, error: ProbeError) -> Self {
        push_answer(&self.rsync, url, Err(error));
        self
    }

    /// `close()` reports this error.
    pub fn with_close_error(self, message: &str) -> Self {
        self.close_errors
            .write()
            .unwrap()
            .push(ProbeError::Protocol(message.to_string()));
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.write().unwrap() = Some(delay);
        self
    }

    pub fn with_panic_on(self, url: &str) -> Self {
        *self.panic_on.write().unwrap() = Some(url.to_string());
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ProbeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.url() == url)
            .count()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::Relaxed)
    }

    async fn record(&self, call: ProbeCall) {
        let panic_on = self.panic_on.read().unwrap().clone();
        if panic_on.as_deref() == Some(call.url()) {
            panic!("scripted panic for {}", call.url());
        }
        self.calls.lock().unwrap().push(call);
        let delay = *self.delay.read().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Prober for MockProber {
    async fn check_url(
        &self,
        url: &str,
        expected_size: Option<u64>,
        readable: bool,
    ) -> Result<ProbeVerdict, ProbeError> {
        self.record(ProbeCall::Check {
            url: url.to_string(),
            expected_size,
            readable,
        })
        .await;
        next_answer(&self.checks, url).unwrap_or_else(|| Err(unscripted(url)))
    }

    async fn list_dir(
        &self,
        url: &str,
        readable: bool,
    ) -> Result<Option<RemoteListing>, ProbeError> {
        self.record(ProbeCall::List {
            url: url.to_string(),
            readable,
        })
        .await;
        next_answer(&self.listings, url).unwrap_or_else(|| Err(unscripted(url)))
    }

    async fn fetch_sha256(&self, url: &str) -> Result<String, ProbeError> {
        self.record(ProbeCall::Sha256 {
            url: url.to_string(),
        })
        .await;
        next_answer(&self.checksums, url).unwrap_or_else(|| Err(unscripted(url)))
    }

    async fn rsync_listing(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<RsyncListing, ProbeError> {
        self.record(ProbeCall::Rsync {
            url: url.to_string(),
            timeout,
        })
        .await;
        next_answer(&self.rsync, url).unwrap_or_else(|| Err(unscripted(url)))
    }

    async fn close(&self) -> Vec<ProbeError> {
        self.close_calls.fetch_add(1, Ordering::Relaxed);
        self.close_errors.read().unwrap().clone()
    }
}

/// Hands out scripted [`MockProber`]s by host id; unknown hosts get an empty one.
#[derive(Default)]
pub struct MockProberFactory {
    probers: Mutex<HashMap<i64, Arc<MockProber>>>,
    created: Mutex<Vec<i64>>,
}

impl MockProberFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(self, host_id: i64, prober: Arc<MockProber>) -> Self {
        self.probers.lock().unwrap().insert(host_id, prober);
        self
    }

    pub fn insert(&self, host_id: i64, prober: Arc<MockProber>) {
        self.probers.lock().unwrap().insert(host_id, prober);
    }

    /// Host ids probers were created for, in order.
    pub fn created(&self) -> Vec<i64> {
        self.created.lock().unwrap().clone()
    }
}

impl ProberFactory for MockProberFactory {
    fn create(&self, host: &Host) -> Arc<dyn Prober> {
        self.created.lock().unwrap().push(host.id);
        let prober = self
            .probers
            .lock()
            .unwrap()
            .entry(host.id)
            .or_insert_with(|| Arc::new(MockProber::new()))
            .clone();
        prober
    }
}
