//! Per-category crawl strategy: URL preference, base check, continent check,
//! rsync pass and per-directory fallback.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{
    Backoff, CategoryOutcome, CategoryScan, CrawlMode, CrawlSettings, DirectoryVerdict, Freshness,
    HostAbort, HostSession,
};
use crate::geo::{GeoGate, Placement};
use crate::probe::{
    join_url, EntryKind, ProbeError, ProbeVerdict, RemoteEntry, RemoteListing, RsyncListing,
    Scheme,
};
use crate::registry::{Directory, HostCategory, ManifestEntry, MirrorRegistry, REPOMD_FILE};

/// Fraction of the remaining host budget an rsync listing may use.
const RSYNC_BUDGET_SHARE: f64 = 0.9;

/// Base URLs of one host category, grouped by protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryUrls {
    pub rsync: Option<String>,
    /// `http://` URLs first, then `https://`.
    pub http: Vec<String>,
    pub ftp: Option<String>,
}

impl CategoryUrls {
    pub fn from_host_category(hc: &HostCategory) -> Self {
        let mut urls = Self::default();
        let mut https = Vec::new();
        for hcurl in &hc.urls {
            let url = hcurl.url.trim_end_matches('/').to_string();
            match Scheme::of(&url) {
                Some(Scheme::Rsync) if urls.rsync.is_none() => urls.rsync = Some(url),
                Some(Scheme::Http) => urls.http.push(url),
                Some(Scheme::Https) => https.push(url),
                Some(Scheme::Ftp) if urls.ftp.is_none() => urls.ftp = Some(url),
                _ => debug!(url = %hcurl.url, "Ignoring URL"),
            }
        }
        urls.http.extend(https);
        urls
    }

    pub fn is_empty(&self) -> bool {
        self.rsync.is_none() && self.http.is_empty() && self.ftp.is_none()
    }

    /// rsync, else HTTP(S), else FTP.
    pub fn preferred(&self) -> Option<&str> {
        self.rsync
            .as_deref()
            .or(self.http.first().map(String::as_str))
            .or(self.ftp.as_deref())
    }

    fn fallback_methods(&self) -> Vec<FallbackMethod> {
        let mut methods = Vec::new();
        if self.ftp.is_some() {
            methods.push(FallbackMethod::FtpListing);
        }
        if !self.http.is_empty() {
            methods.push(FallbackMethod::HttpFiles);
        }
        if self.ftp.is_some() {
            methods.push(FallbackMethod::FtpFiles);
        }
        methods
    }
}

/// Ways of judging a single directory when the rsync pass did not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackMethod {
    FtpListing,
    HttpFiles,
    FtpFiles,
}

/// Why a fallback method produced no verdict.
#[derive(Debug)]
enum MethodError {
    Probe(ProbeError),
    Abort(HostAbort),
}

impl From<ProbeError> for MethodError {
    fn from(e: ProbeError) -> Self {
        Self::Probe(e)
    }
}

impl From<HostAbort> for MethodError {
    fn from(abort: HostAbort) -> Self {
        Self::Abort(abort)
    }
}

/// The method that last produced a definite verdict in this category goes first.
#[derive(Debug, Clone, Default)]
pub struct MethodPreference {
    last: Option<FallbackMethod>,
}

impl MethodPreference {
    pub fn order(&self, available: &[FallbackMethod]) -> Vec<FallbackMethod> {
        let mut order = available.to_vec();
        if let Some(last) = self.last {
            if let Some(pos) = order.iter().position(|m| *m == last) {
                let preferred = order.remove(pos);
                order.insert(0, preferred);
            }
        }
        order
    }

    pub fn remember(&mut self, method: FallbackMethod) {
        self.last = Some(method);
    }
}

/// Continent/embargo decisions, made once per hostname within a host crawl.
pub struct ContinentCheck {
    gate: Option<GeoGate>,
    decided: HashMap<String, Result<(), HostAbort>>,
}

impl ContinentCheck {
    pub fn new(gate: Option<GeoGate>) -> Self {
        Self {
            gate: gate.filter(GeoGate::is_active),
            decided: HashMap::new(),
        }
    }

    pub async fn check(&mut self, url: &str) -> Result<(), HostAbort> {
        let Some(gate) = &self.gate else {
            return Ok(());
        };
        let key = crate::geo::url_hostname(url).unwrap_or_else(|| url.to_string());
        if let Some(decided) = self.decided.get(&key) {
            return decided.clone();
        }

        let decided = match gate.place(url).await {
            Ok(Placement::Allowed { country }) => {
                debug!(host = %key, country = %country, "Host is on a selected continent");
                Ok(())
            }
            Ok(Placement::WrongContinent { country, continent }) => {
                info!(host = %key, country = %country, continent = %continent, "Wrong continent");
                Err(HostAbort::WrongContinent { country, continent })
            }
            Ok(Placement::Embargoed { country }) => Err(HostAbort::Embargoed { country }),
            Err(e) => {
                warn!(host = %key, error = %e, "Geolocation failed");
                Err(HostAbort::GeoLookupFailed(e.to_string()))
            }
        };
        self.decided.insert(key, decided.clone());
        decided
    }
}

/// Effective rsync timeout: the configured limit, never beyond 90% of what is left.
pub fn rsync_limit(configured: Option<Duration>, remaining: Duration) -> Duration {
    let share = remaining.mul_f64(RSYNC_BUDGET_SHARE);
    configured.map_or(share, |limit| limit.min(share))
}

/// Compare a manifest against remote entries.
///
/// Symlinks are exempt from the size comparison. A missing entry is stale when
/// the listing is complete and unknown otherwise.
pub fn compare_manifest<'a>(
    files: &[ManifestEntry],
    lookup: impl Fn(&str) -> Option<&'a RemoteEntry>,
    complete: bool,
) -> Freshness {
    if files.is_empty() {
        return Freshness::Unknown;
    }
    let mut pending = false;
    for file in files {
        match lookup(&file.name) {
            None if complete => {
                debug!(file = %file.name, "Missing remote file");
                return Freshness::Stale;
            }
            None => pending = true,
            Some(entry) if entry.kind == EntryKind::Symlink => {}
            Some(entry) if entry.size == Some(file.size) => {}
            Some(entry) => {
                debug!(file = %file.name, remote = ?entry.size, expected = file.size, "Size mismatch");
                return Freshness::Stale;
            }
        }
    }
    if pending {
        Freshness::Unknown
    } else {
        Freshness::UpToDate
    }
}

/// A directory of the category tree with its path below the topdir.
#[derive(Debug, Clone)]
pub struct TrackedDir {
    pub directory: Directory,
    pub path: String,
}

impl TrackedDir {
    pub fn collect(directories: Vec<Directory>, topdir: &str) -> Vec<Self> {
        directories
            .into_iter()
            .filter_map(|directory| {
                let path = directory.relative_path(topdir)?.to_string();
                Some(Self { directory, path })
            })
            .collect()
    }

    fn file_key(&self, file: &str) -> String {
        if self.path.is_empty() {
            file.to_string()
        } else {
            format!("{}/{}", self.path, file)
        }
    }
}

/// Verdicts of one rsync listing for every tracked directory, with ancestor back-fill.
pub fn diff_rsync_listing(dirs: &[TrackedDir], listing: &RsyncListing) -> Vec<Freshness> {
    let mut verdicts: Vec<Freshness> = dirs
        .iter()
        .map(|dir| {
            if !dir.directory.readable {
                return Freshness::Unknown;
            }
            let keys: BTreeMap<&str, String> = dir
                .directory
                .files
                .iter()
                .map(|f| (f.name.as_str(), dir.file_key(&f.name)))
                .collect();
            compare_manifest(
                &dir.directory.files,
                |name| keys.get(name).and_then(|key| listing.entries.get(key)),
                listing.complete,
            )
        })
        .collect();

    let index: HashMap<&str, usize> = dirs
        .iter()
        .enumerate()
        .map(|(i, dir)| (dir.path.as_str(), i))
        .collect();
    let confirmed: Vec<&str> = dirs
        .iter()
        .zip(&verdicts)
        .filter(|(_, v)| **v == Freshness::UpToDate)
        .map(|(dir, _)| dir.path.as_str())
        .collect();

    for path in confirmed {
        let mut ancestor = path;
        while let Some((parent, _)) = ancestor.rsplit_once('/') {
            ancestor = parent;
            if let Some(&i) = index.get(ancestor) {
                if verdicts[i] == Freshness::Unknown {
                    verdicts[i] = Freshness::UpToDate;
                }
            }
        }
    }
    verdicts
}

/// Scans the categories of one host. Owns the busy-server backoff for the host.
pub struct CategoryEngine {
    registry: Arc<dyn MirrorRegistry>,
    settings: CrawlSettings,
    backoff: Backoff,
}

impl CategoryEngine {
    pub fn new(registry: Arc<dyn MirrorRegistry>, settings: CrawlSettings) -> Self {
        let backoff = Backoff::new(settings.backoff_initial, settings.backoff_max);
        Self {
            registry,
            settings,
            backoff,
        }
    }

    pub async fn scan(
        &mut self,
        session: &HostSession,
        hc: &HostCategory,
        continent: &mut ContinentCheck,
    ) -> Result<CategoryOutcome, HostAbort> {
        let category = hc.category.name.as_str();
        debug!(category, mode = %self.settings.mode, "Scanning category");

        let urls = CategoryUrls::from_host_category(hc);
        let Some(preferred) = urls.preferred() else {
            info!(category, "No usable URL for category");
            return Ok(CategoryOutcome::Unreachable);
        };

        // Before any network access to the mirror itself.
        continent.check(preferred).await?;

        if !self.base_reachable(session, &urls).await? {
            warn!(category, "No working base URL for category");
            return Ok(CategoryOutcome::Unreachable);
        }

        if self.settings.mode == CrawlMode::Canary {
            return Ok(CategoryOutcome::Reachable);
        }

        let repodata_only = self.settings.mode == CrawlMode::RepodataOnly;
        let directories = self
            .registry
            .category_directories(hc.category.id, repodata_only)?;
        let dirs = TrackedDir::collect(directories, &hc.category.topdir);
        let mut verdicts = vec![Freshness::Unknown; dirs.len()];
        let mut rsync_empty = false;

        if !repodata_only {
            if let Some(url) = &urls.rsync {
                session.check()?;
                let limit = rsync_limit(self.settings.rsync_timeout, session.remaining());
                match session.prober().rsync_listing(url, limit).await {
                    Ok(listing) if listing.entries.is_empty() => {
                        warn!(category, url = %url, "rsync listing has no usable entries");
                        rsync_empty = true;
                    }
                    Ok(listing) => {
                        debug!(
                            category,
                            entries = listing.entries.len(),
                            complete = listing.complete,
                            "rsync listing received"
                        );
                        verdicts = diff_rsync_listing(&dirs, &listing);
                    }
                    Err(e) => {
                        warn!(category, url = %url, error = %e, "rsync failed, probing directories one by one");
                    }
                }
            }
        }

        let methods = urls.fallback_methods();
        let mut preference = MethodPreference::default();
        for (dir, verdict) in dirs.iter().zip(verdicts.iter_mut()) {
            session.check()?;
            if verdict.is_definite() || methods.is_empty() {
                continue;
            }
            *verdict = self
                .probe_directory(session, &urls, &methods, &mut preference, dir)
                .await?;
        }
        // The last directory may have used up the budget.
        session.check()?;

        let verdicts = dirs
            .iter()
            .zip(verdicts)
            .map(|(dir, freshness)| DirectoryVerdict {
                directory_id: dir.directory.id,
                path: dir.path.clone(),
                readable: dir.directory.readable,
                repodata: dir.directory.is_repodata(),
                freshness,
            })
            .collect();

        Ok(CategoryOutcome::Scanned(CategoryScan {
            host_category_id: hc.id,
            category: category.to_string(),
            total_directories: dirs.len(),
            verdicts,
            rsync_empty,
        }))
    }

    /// At least one HTTP(S) or FTP base URL must answer. rsync does not count.
    async fn base_reachable(
        &self,
        session: &HostSession,
        urls: &CategoryUrls,
    ) -> Result<bool, HostAbort> {
        for url in &urls.http {
            session.check()?;
            match session.prober().check_url(&format!("{}/", url), None, true).await {
                Ok(ProbeVerdict::Exists) => return Ok(true),
                Ok(verdict) => warn!(url = %url, ?verdict, "Base URL does not exist"),
                Err(e) => info!(url = %url, error = %e, "Could not get the base URL"),
            }
        }

        if let Some(url) = &urls.ftp {
            session.check()?;
            match session.prober().list_dir(url, true).await {
                Ok(Some(listing)) if !listing.is_empty() => return Ok(true),
                Ok(_) => warn!(url = %url, "Base URL does not exist"),
                Err(e) => info!(url = %url, error = %e, "Could not list the base URL"),
            }
        }

        Ok(false)
    }

    /// Judge one directory, retrying after busy answers until the budget runs out.
    async fn probe_directory(
        &mut self,
        session: &HostSession,
        urls: &CategoryUrls,
        methods: &[FallbackMethod],
        preference: &mut MethodPreference,
        dir: &TrackedDir,
    ) -> Result<Freshness, HostAbort> {
        loop {
            session.check()?;

            let mut busy = None;
            let mut verdict = Freshness::Unknown;
            for method in preference.order(methods) {
                match self.try_method(session, urls, method, dir).await {
                    Ok(Freshness::Unknown) => continue,
                    Ok(found) => {
                        preference.remember(method);
                        verdict = found;
                        break;
                    }
                    Err(MethodError::Abort(abort)) => return Err(abort),
                    Err(MethodError::Probe(e)) if e.is_transient() => {
                        busy = Some(e);
                        break;
                    }
                    Err(MethodError::Probe(e)) => {
                        warn!(directory = %dir.directory.name, ?method, error = %e, "Probe failed");
                    }
                }
            }

            if let Some(e) = busy {
                let delay = self.backoff.next_delay();
                info!(
                    directory = %dir.directory.name,
                    error = %e,
                    delay_secs = delay.as_secs(),
                    "Server busy, trying again later"
                );
                session.sleep(delay).await?;
                continue;
            }

            if verdict.is_definite() {
                self.backoff.on_success();
            }
            if verdict == Freshness::UpToDate {
                verdict = self.verify_repomd(session, urls, dir).await?;
            }
            return Ok(verdict);
        }
    }

    async fn try_method(
        &self,
        session: &HostSession,
        urls: &CategoryUrls,
        method: FallbackMethod,
        dir: &TrackedDir,
    ) -> Result<Freshness, MethodError> {
        session.check()?;
        let readable = dir.directory.readable;
        let files = &dir.directory.files;

        let freshness = match method {
            FallbackMethod::FtpListing => {
                let Some(base) = &urls.ftp else {
                    return Ok(Freshness::Unknown);
                };
                let url = join_url(base, &dir.path);
                match session.prober().list_dir(&url, readable).await? {
                    None => Freshness::Unknown,
                    Some(listing) => judge_listing(files, &listing),
                }
            }
            FallbackMethod::HttpFiles | FallbackMethod::FtpFiles => {
                let base = match method {
                    FallbackMethod::HttpFiles => urls.http.first(),
                    _ => urls.ftp.as_ref(),
                };
                let Some(base) = base else {
                    return Ok(Freshness::Unknown);
                };
                self.check_files(session, base, dir).await?
            }
        };

        if !readable && freshness == Freshness::Stale {
            return Ok(Freshness::Unknown);
        }
        Ok(freshness)
    }

    async fn check_files(
        &self,
        session: &HostSession,
        base: &str,
        dir: &TrackedDir,
    ) -> Result<Freshness, MethodError> {
        if dir.directory.files.is_empty() {
            return Ok(Freshness::Unknown);
        }
        for file in &dir.directory.files {
            session.check()?;
            let url = join_url(base, &dir.file_key(&file.name));
            match session
                .prober()
                .check_url(&url, Some(file.size), dir.directory.readable)
                .await?
            {
                ProbeVerdict::Exists => {}
                ProbeVerdict::Absent => return Ok(Freshness::Stale),
                ProbeVerdict::Unknown => return Ok(Freshness::Unknown),
            }
        }
        Ok(Freshness::UpToDate)
    }

    /// Same size is not enough for the metadata index: compare its checksum too.
    async fn verify_repomd(
        &self,
        session: &HostSession,
        urls: &CategoryUrls,
        dir: &TrackedDir,
    ) -> Result<Freshness, HostAbort> {
        let Some(base) = urls.http.first() else {
            return Ok(Freshness::UpToDate);
        };
        if !dir.directory.files.iter().any(|f| f.name == REPOMD_FILE) {
            return Ok(Freshness::UpToDate);
        }
        let Some(expected) = self
            .registry
            .latest_file_detail(dir.directory.id, REPOMD_FILE)?
            .and_then(|fd| fd.sha256)
        else {
            return Ok(Freshness::UpToDate);
        };

        session.check()?;
        let url = join_url(base, &dir.file_key(REPOMD_FILE));
        match session.prober().fetch_sha256(&url).await {
            Ok(actual) if actual.eq_ignore_ascii_case(&expected) => Ok(Freshness::UpToDate),
            Ok(actual) => {
                info!(url = %url, %actual, %expected, "Metadata index checksum differs");
                Ok(Freshness::Stale)
            }
            Err(e) => {
                info!(url = %url, error = %e, "Could not fetch the metadata index");
                Ok(Freshness::Unknown)
            }
        }
    }
}

/// Verdict from a single FTP listing of the directory.
fn judge_listing(files: &[ManifestEntry], listing: &RemoteListing) -> Freshness {
    if files.is_empty() {
        // Without a manifest only a populated listing says anything.
        return if listing.is_empty() {
            Freshness::Unknown
        } else {
            Freshness::UpToDate
        };
    }
    if listing.is_empty() {
        return Freshness::Stale;
    }
    compare_manifest(files, |name| listing.get(name), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Category, HostCategoryUrl};

    fn entry(size: u64) -> RemoteEntry {
        RemoteEntry {
            kind: EntryKind::File,
            size: Some(size),
        }
    }

    fn manifest(files: &[(&str, u64)]) -> Vec<ManifestEntry> {
        files
            .iter()
            .map(|(name, size)| ManifestEntry {
                name: name.to_string(),
                size: *size,
                timestamp: 0,
            })
            .collect()
    }

    fn tracked(id: i64, path: &str, readable: bool, files: &[(&str, u64)]) -> TrackedDir {
        let name = if path.is_empty() {
            "pub/fedora".to_string()
        } else {
            format!("pub/fedora/{}", path)
        };
        TrackedDir {
            directory: Directory {
                id,
                name,
                readable,
                files: manifest(files),
            },
            path: path.to_string(),
        }
    }

    fn listing(entries: &[(&str, RemoteEntry)], complete: bool) -> RsyncListing {
        RsyncListing {
            entries: entries
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            complete,
            exit_code: complete.then_some(0),
        }
    }

    fn host_category(urls: &[&str]) -> HostCategory {
        HostCategory {
            id: 1,
            host_id: 1,
            category: Category {
                id: 1,
                name: "Fedora Linux".to_string(),
                topdir: "pub/fedora".to_string(),
            },
            always_up2date: false,
            urls: urls
                .iter()
                .enumerate()
                .map(|(i, url)| HostCategoryUrl {
                    id: i as i64,
                    host_category_id: 1,
                    url: url.to_string(),
                    private: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_url_preference() {
        let urls = CategoryUrls::from_host_category(&host_category(&[
            "https://m.example.org/fedora/",
            "ftp://m.example.org/fedora",
            "http://m.example.org/fedora",
            "rsync://m.example.org/fedora",
        ]));
        assert_eq!(urls.preferred(), Some("rsync://m.example.org/fedora"));
        assert_eq!(
            urls.http,
            vec![
                "http://m.example.org/fedora".to_string(),
                "https://m.example.org/fedora".to_string()
            ]
        );

        let no_rsync = CategoryUrls::from_host_category(&host_category(&[
            "ftp://m.example.org/fedora",
            "https://m.example.org/fedora",
        ]));
        assert_eq!(no_rsync.preferred(), Some("https://m.example.org/fedora"));

        assert!(CategoryUrls::from_host_category(&host_category(&["gopher://x/"])).is_empty());
    }

    #[test]
    fn test_fallback_method_order_and_preference() {
        let urls = CategoryUrls {
            rsync: None,
            http: vec!["http://m/".to_string()],
            ftp: Some("ftp://m/".to_string()),
        };
        let methods = urls.fallback_methods();
        assert_eq!(
            methods,
            vec![
                FallbackMethod::FtpListing,
                FallbackMethod::HttpFiles,
                FallbackMethod::FtpFiles
            ]
        );

        let mut pref = MethodPreference::default();
        assert_eq!(pref.order(&methods)[0], FallbackMethod::FtpListing);
        pref.remember(FallbackMethod::HttpFiles);
        assert_eq!(
            pref.order(&methods),
            vec![
                FallbackMethod::HttpFiles,
                FallbackMethod::FtpListing,
                FallbackMethod::FtpFiles
            ]
        );
    }

    #[test]
    fn test_rsync_limit() {
        let remaining = Duration::from_secs(1000);
        assert_eq!(rsync_limit(None, remaining), Duration::from_secs(900));
        assert_eq!(
            rsync_limit(Some(Duration::from_secs(60)), remaining),
            Duration::from_secs(60)
        );
        assert_eq!(
            rsync_limit(Some(Duration::from_secs(5000)), remaining),
            Duration::from_secs(900)
        );
    }

    #[test]
    fn test_rsync_size_mismatch_is_stale() {
        let dirs = vec![tracked(1, "repodata", true, &[("repomd.xml", 2048)])];
        let l = listing(&[("repodata/repomd.xml", entry(1024))], true);
        assert_eq!(diff_rsync_listing(&dirs, &l), vec![Freshness::Stale]);
    }

    #[test]
    fn test_rsync_symlink_size_exempt() {
        let dirs = vec![tracked(1, "iso", true, &[("latest.iso", 4096)])];
        let link = RemoteEntry {
            kind: EntryKind::Symlink,
            size: Some(12),
        };
        let l = listing(&[("iso/latest.iso", link)], true);
        assert_eq!(diff_rsync_listing(&dirs, &l), vec![Freshness::UpToDate]);
    }

    #[test]
    fn test_rsync_unparsable_size_is_stale() {
        let dirs = vec![tracked(1, "iso", true, &[("a.iso", 10)])];
        let bad = RemoteEntry {
            kind: EntryKind::File,
            size: None,
        };
        let l = listing(&[("iso/a.iso", bad)], true);
        assert_eq!(diff_rsync_listing(&dirs, &l), vec![Freshness::Stale]);
    }

    #[test]
    fn test_rsync_missing_entry_complete_vs_partial() {
        let dirs = vec![
            tracked(1, "a", true, &[("x.rpm", 500)]),
            tracked(2, "b", true, &[("y.rpm", 500)]),
        ];
        let complete = listing(&[("a/x.rpm", entry(500))], true);
        assert_eq!(
            diff_rsync_listing(&dirs, &complete),
            vec![Freshness::UpToDate, Freshness::Stale]
        );

        let partial = listing(&[("a/x.rpm", entry(500))], false);
        assert_eq!(
            diff_rsync_listing(&dirs, &partial),
            vec![Freshness::UpToDate, Freshness::Unknown]
        );
    }

    #[test]
    fn test_rsync_unreadable_and_empty_manifest_are_unknown() {
        let dirs = vec![
            tracked(1, "hidden", false, &[("x", 1)]),
            tracked(2, "empty", true, &[]),
        ];
        let l = listing(&[("hidden/x", entry(1))], true);
        assert_eq!(
            diff_rsync_listing(&dirs, &l),
            vec![Freshness::Unknown, Freshness::Unknown]
        );
    }

    #[test]
    fn test_rsync_backfills_ancestors_but_not_root() {
        let dirs = vec![
            tracked(1, "", true, &[]),
            tracked(2, "updates", true, &[]),
            tracked(3, "updates/39", true, &[]),
            tracked(4, "updates/39/x86_64", true, &[("a.rpm", 5)]),
            tracked(5, "updates/38", true, &[("b.rpm", 5)]),
        ];
        let l = listing(
            &[("updates/39/x86_64/a.rpm", entry(5)), ("updates/38/b.rpm", entry(6))],
            true,
        );
        assert_eq!(
            diff_rsync_listing(&dirs, &l),
            vec![
                Freshness::Unknown,
                Freshness::UpToDate,
                Freshness::UpToDate,
                Freshness::UpToDate,
                Freshness::Stale,
            ]
        );
    }

    #[test]
    fn test_backfill_never_overrides_stale() {
        let dirs = vec![
            tracked(1, "updates", true, &[("old.rpm", 1)]),
            tracked(2, "updates/39", true, &[("a.rpm", 5)]),
        ];
        let l = listing(&[("updates/39/a.rpm", entry(5))], true);
        assert_eq!(
            diff_rsync_listing(&dirs, &l),
            vec![Freshness::Stale, Freshness::UpToDate]
        );
    }

    #[test]
    fn test_judge_listing() {
        let files = manifest(&[("a.rpm", 5)]);
        let mut l = RemoteListing::new();
        assert_eq!(judge_listing(&files, &l), Freshness::Stale);
        assert_eq!(judge_listing(&[], &l), Freshness::Unknown);

        l.insert("a.rpm".to_string(), entry(5));
        assert_eq!(judge_listing(&files, &l), Freshness::UpToDate);
        assert_eq!(judge_listing(&[], &l), Freshness::UpToDate);

        l.insert("a.rpm".to_string(), entry(6));
        assert_eq!(judge_listing(&files, &l), Freshness::Stale);
    }
}
