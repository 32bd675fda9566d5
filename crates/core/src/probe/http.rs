//! HTTP/HTTPS existence probe.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::header::{HeaderMap, CONNECTION, CONTENT_LENGTH, LOCATION, PRAGMA, TRANSFER_ENCODING};
use reqwest::{Client, Method, Response, StatusCode, Url};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{ProbeError, ProbeVerdict};

/// Redirects followed before a probe gives up with `Unknown`.
pub const MAX_REDIRECTS: usize = 10;

/// Largest body `fetch_sha256` reads. Metadata indexes are a few kilobytes.
pub const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

/// HEAD/GET prober keeping one client (and so one pooled connection) per origin.
pub struct HttpProbe {
    clients: Mutex<HashMap<String, Client>>,
    user_agent: String,
    timeout: Duration,
    body_limit: u64,
}

impl HttpProbe {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            user_agent: user_agent.into(),
            timeout,
            body_limit: MAX_BODY_BYTES,
        }
    }

    pub fn with_body_limit(mut self, limit: u64) -> Self {
        self.body_limit = limit;
        self
    }

    fn origin_key(url: &Url) -> String {
        url.origin().ascii_serialization()
    }

    fn client_for(&self, url: &Url) -> Result<Client, ProbeError> {
        let key = Self::origin_key(url);
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| ProbeError::Protocol("http client cache poisoned".to_string()))?;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .user_agent(self.user_agent.clone())
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| ProbeError::Protocol(format!("failed to build http client: {}", e)))?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    fn drop_client(&self, url: &Url) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.remove(&Self::origin_key(url));
        }
    }

    /// Number of cached per-origin clients.
    pub fn cached_connections(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// One request, retried once on a fresh client after a connection-level failure.
    async fn request(&self, method: &Method, url: &Url) -> Result<Response, ProbeError> {
        let mut last_error = String::new();

        for attempt in 0..2 {
            let client = self.client_for(url)?;
            let result = client
                .request(method.clone(), url.clone())
                .header(PRAGMA, "no-cache")
                .send()
                .await;

            match result {
                Ok(response) => {
                    if peer_closes(response.headers()) {
                        // The peer is closing; the next probe must not reuse this connection.
                        self.drop_client(url);
                    }
                    return Ok(response);
                }
                Err(e) if e.is_timeout() => {
                    self.drop_client(url);
                    return Err(ProbeError::Timeout {
                        after: self.timeout,
                    });
                }
                Err(e) => {
                    debug!(url = %url, attempt, error = %e, "HTTP request failed");
                    self.drop_client(url);
                    last_error = e.to_string();
                }
            }
        }

        Err(ProbeError::Connection(last_error))
    }

    /// Send a request, following redirects. `None` when the redirect chain is too long or broken.
    async fn send(&self, method: Method, url: &str) -> Result<Option<Response>, ProbeError> {
        let mut current =
            Url::parse(url).map_err(|e| ProbeError::Protocol(format!("invalid url {}: {}", url, e)))?;

        for _ in 0..=MAX_REDIRECTS {
            let response = self.request(&method, &current).await?;
            if !response.status().is_redirection() {
                return Ok(Some(response));
            }

            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
            else {
                return Ok(None);
            };
            match current.join(location) {
                Ok(next) => {
                    debug!(from = %current, to = %next, "Following redirect");
                    current = next;
                }
                Err(_) => return Ok(None),
            }
        }

        debug!(url, "Too many redirects");
        Ok(None)
    }

    /// Metadata-only existence check, comparing `Content-Length` when a size is expected.
    pub async fn check(
        &self,
        url: &str,
        expected_size: Option<u64>,
        readable: bool,
    ) -> Result<ProbeVerdict, ProbeError> {
        let Some(response) = self.send(Method::HEAD, url).await? else {
            return Ok(ProbeVerdict::Unknown);
        };

        let status = response.status();
        if status.is_success() {
            return Ok(size_verdict(response.headers(), expected_size));
        }

        match status {
            StatusCode::FORBIDDEN if readable => Ok(ProbeVerdict::Absent),
            StatusCode::FORBIDDEN => Ok(ProbeVerdict::Unknown),
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(ProbeVerdict::Absent),
            s => status_error(s, url).map(|_| ProbeVerdict::Unknown),
        }
    }

    /// GET a document and return its lowercase hex SHA-256.
    pub async fn fetch_sha256(&self, url: &str) -> Result<String, ProbeError> {
        let Some(mut response) = self.send(Method::GET, url).await? else {
            return Err(ProbeError::Protocol(format!("too many redirects for {}", url)));
        };

        let status = response.status();
        if !status.is_success() {
            status_error(status, url)?;
            return Err(ProbeError::Protocol(format!("HTTP {} for {}", status, url)));
        }

        let too_large = || {
            ProbeError::Protocol(format!("body of {} exceeds {} bytes", url, self.body_limit))
        };
        if response.content_length().is_some_and(|len| len > self.body_limit) {
            return Err(too_large());
        }

        let mut hasher = Sha256::new();
        let mut read: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProbeError::Connection(e.to_string()))?
        {
            read += chunk.len() as u64;
            if read > self.body_limit {
                return Err(too_large());
            }
            hasher.update(&chunk);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn close(&self) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.clear();
        }
    }
}

fn peer_closes(headers: &HeaderMap) -> bool {
    headers
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("close"))
}

/// Busy and server-side errors surface to the caller; anything else is not an error.
fn status_error(status: StatusCode, url: &str) -> Result<(), ProbeError> {
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            Err(ProbeError::try_later(format!("HTTP {} for {}", status.as_u16(), url)))
        }
        s if s.is_server_error() => Err(ProbeError::ServerError {
            status: s.as_u16(),
            url: url.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Missing or streaming lengths count as a match; an unparsable one cannot be judged.
fn size_verdict(headers: &HeaderMap, expected_size: Option<u64>) -> ProbeVerdict {
    let Some(expected) = expected_size else {
        return ProbeVerdict::Exists;
    };

    let chunked = headers
        .get(TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return ProbeVerdict::Exists;
    }

    match headers.get(CONTENT_LENGTH) {
        None => ProbeVerdict::Exists,
        Some(value) => match value.to_str().ok().and_then(|s| s.trim().parse::<u64>().ok()) {
            Some(length) if length == expected => ProbeVerdict::Exists,
            Some(_) => ProbeVerdict::Absent,
            None => ProbeVerdict::Unknown,
        },
    }
}
