//! Per-host crawl logs.
//!
//! [`HostLogLayer`] buffers every event emitted inside a `host` span, keyed by
//! the span's `host_id` field. When the host's crawl ends the orchestrator
//! either persists the buffer to `<dir>/<host_id>.log` or discards it.

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Name of the span every host crawl runs in.
pub const HOST_SPAN: &str = "host";

/// Shared per-host log buffers.
#[derive(Clone, Default)]
pub struct HostLogs {
    buffers: Arc<Mutex<HashMap<i64, Vec<String>>>>,
}

impl HostLogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// A layer feeding these buffers.
    pub fn layer(&self) -> HostLogLayer {
        HostLogLayer { logs: self.clone() }
    }

    fn push(&self, host_id: i64, line: String) {
        if let Ok(mut buffers) = self.buffers.lock() {
            buffers.entry(host_id).or_default().push(line);
        }
    }

    /// Remove and return the buffered lines of a host.
    pub fn take(&self, host_id: i64) -> Vec<String> {
        self.buffers
            .lock()
            .ok()
            .and_then(|mut buffers| buffers.remove(&host_id))
            .unwrap_or_default()
    }

    pub fn discard(&self, host_id: i64) {
        self.take(host_id);
    }

    /// Write the host's buffer to `<dir>/<host_id>.log`, replacing any earlier file.
    pub async fn persist(&self, dir: &Path, host_id: i64) -> std::io::Result<PathBuf> {
        let lines = self.take(host_id);
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.log", host_id));
        let mut contents = lines.join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }
}

impl fmt::Debug for HostLogs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hosts = self.buffers.lock().map(|b| b.len()).unwrap_or(0);
        f.debug_struct("HostLogs").field("hosts", &hosts).finish()
    }
}

/// Extension stored on `host` spans.
struct HostTag(i64);

struct HostIdVisitor(Option<i64>);

impl Visit for HostIdVisitor {
    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "host_id" {
            self.0 = Some(value);
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "host_id" {
            self.0 = i64::try_from(value).ok();
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn fmt::Debug) {}
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// `tracing` layer capturing events of `host` spans into [`HostLogs`].
pub struct HostLogLayer {
    logs: HostLogs,
}

impl<S> Layer<S> for HostLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if attrs.metadata().name() != HOST_SPAN {
            return;
        }
        let mut visitor = HostIdVisitor(None);
        attrs.record(&mut visitor);
        if let (Some(host_id), Some(span)) = (visitor.0, ctx.span(id)) {
            span.extensions_mut().insert(HostTag(host_id));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(scope) = ctx.event_scope(event) else {
            return;
        };
        let host_id = scope.from_root().find_map(|span| {
            let extensions = span.extensions();
            extensions.get::<HostTag>().map(|tag| tag.0)
        });
        let Some(host_id) = host_id else {
            return;
        };

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let meta = event.metadata();
        self.logs.push(
            host_id,
            format!(
                "{} {:>5} {}: {}{}",
                Utc::now().format("%Y-%m-%d %H:%M:%S"),
                meta.level(),
                meta.target(),
                visitor.message,
                visitor.fields
            ),
        );
    }
}
