//! Passive capture of the page's own network traffic.
//!
//! The listing page fetches its data from endpoints that are not documented
//! anywhere. Recording those exchanges during a normal scrape is how the
//! underlying API gets discovered; the table parser remains the fallback.
//!
//! WebDriver has no network event stream, so the recorder installs a small
//! hook in each loaded document. The hook wraps `fetch` and `XMLHttpRequest`
//! and buffers completed exchanges in `window.__gavelCapture`.
//!
//! Traffic that finished before the hook existed is recovered from the
//! Resource Timing buffer when the hook is installed: the document's own
//! navigation and any fetch/XHR issued during load. Form submissions are
//! remembered in `sessionStorage` so the POST that produced the next document
//! is reported with its method and body. The buffer is drained into the run's
//! [`NetworkRecorder`] before every page-changing action and, optionally, by a
//! background poller.
use crate::gavel_browser::page::PageHandle;
use chrono::{DateTime, Utc};
use gavel_common::{GavelError, Result};
use gavel_config::CaptureSettings;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-document cap on buffered exchanges between drains.
const PAGE_BUFFER_CAP: usize = 500;

/// Marker the hook sets on `window`; its presence means the hook is live.
pub const HOOK_GLOBAL: &str = "__gavelCapture";

const INSTALL_SCRIPT: &str = r#"
    if (window.__gavelCapture) return false;
    const buf = window.__gavelCapture = [];
    const limit = __BODY_LIMIT__;
    const pageCap = __PAGE_CAP__;
    const clip = (t) => (typeof t === 'string') ? t.slice(0, limit) : null;
    const abs = (u) => { try { return new URL(u, location.href).href; } catch (_) { return String(u); } };
    const push = (e) => { if (buf.length < pageCap) buf.push(e); };
    const stamp = (t) => Math.round(performance.timeOrigin + t);

    let submitted = null;
    try {
        submitted = JSON.parse(sessionStorage.getItem('__gavelSubmit') || 'null');
        sessionStorage.removeItem('__gavelSubmit');
    } catch (_) {}
    for (const e of performance.getEntriesByType('navigation')) {
        push({ kind: 'navigation', url: e.name,
               method: submitted ? submitted.method : 'GET',
               request_body: submitted ? clip(submitted.body) : null,
               response_body: clip(document.documentElement ? document.documentElement.outerHTML : null),
               status: e.responseStatus || null, timestamp_ms: stamp(e.startTime) });
    }
    for (const e of performance.getEntriesByType('resource')) {
        if (!['fetch', 'xmlhttprequest', 'beacon'].includes(e.initiatorType)) continue;
        push({ kind: 'resource', url: e.name, request_body: null, response_body: null,
               status: e.responseStatus || null, timestamp_ms: stamp(e.startTime) });
    }

    const remember = (form) => {
        try {
            const method = String(form.method || 'GET').toUpperCase();
            const body = new URLSearchParams(new FormData(form)).toString();
            sessionStorage.setItem('__gavelSubmit', JSON.stringify({ url: abs(form.action), method, body }));
        } catch (_) {}
    };
    document.addEventListener('submit', (ev) => remember(ev.target), true);
    const formSubmit = HTMLFormElement.prototype.submit;
    HTMLFormElement.prototype.submit = function () {
        remember(this);
        return formSubmit.apply(this, arguments);
    };

    const origFetch = window.fetch;
    if (origFetch) {
        window.fetch = function (input, init) {
            const url = abs(typeof input === 'string' ? input : (input && input.url));
            const method = ((init && init.method) || (input && input.method) || 'GET').toUpperCase();
            const body = init && typeof init.body === 'string' ? clip(init.body) : null;
            return origFetch.apply(this, arguments).then((resp) => {
                resp.clone().text().then(
                    (text) => push({ kind: 'fetch', url, method, request_body: body, response_body: clip(text),
                                     status: resp.status, timestamp_ms: Date.now() }),
                    () => push({ kind: 'fetch', url, method, request_body: body, response_body: null,
                                 status: resp.status, timestamp_ms: Date.now() })
                );
                return resp;
            });
        };
    }

    const open = XMLHttpRequest.prototype.open;
    const send = XMLHttpRequest.prototype.send;
    XMLHttpRequest.prototype.open = function (method, url) {
        this.__gavel = { method: String(method || 'GET').toUpperCase(), url: abs(url) };
        return open.apply(this, arguments);
    };
    XMLHttpRequest.prototype.send = function (body) {
        const meta = this.__gavel || { method: 'GET', url: '' };
        const requestBody = typeof body === 'string' ? clip(body) : null;
        this.addEventListener('loadend', () => {
            let text = null;
            try {
                if (this.responseType === '' || this.responseType === 'text') text = clip(this.responseText);
            } catch (_) {}
            push({ kind: 'xhr', url: meta.url, method: meta.method, request_body: requestBody,
                   response_body: text, status: this.status, timestamp_ms: Date.now() });
        });
        return send.apply(this, arguments);
    };
    return true;
"#;

/// Script body that empties the in-page buffer and returns its contents.
pub const DRAIN_SCRIPT: &str = r#"
    const buf = window.__gavelCapture;
    if (!buf) return [];
    return buf.splice(0, buf.length);
"#;

/// How an exchange was observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    #[default]
    Fetch,
    Xhr,
    /// A document load, including form submissions.
    Navigation,
    /// A fetch/XHR that completed before the hook was installed. Only the
    /// URL, status and start time are known; the method is reported as GET.
    Resource,
}

/// One recorded request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub kind: ExchangeKind,
    pub url: String,
    pub method: String,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub status: Option<u16>,
    pub timestamp: DateTime<Utc>,
    /// Tag of the URL pattern that matched.
    pub pattern: String,
}

/// Exchange as reported by the in-page hook.
#[derive(Debug, Clone, Deserialize)]
pub struct PageExchange {
    #[serde(default)]
    pub kind: ExchangeKind,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub request_body: Option<String>,
    #[serde(default)]
    pub response_body: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub timestamp_ms: Option<i64>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Tagged URL pattern.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    tag: String,
    regex: Regex,
}

impl UrlPattern {
    pub fn new(tag: &str, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| {
            GavelError::Config(format!("capture pattern {tag:?} ({pattern}) is invalid: {e}"))
        })?;
        Ok(Self {
            tag: tag.to_string(),
            regex,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

/// Bounded, append-only log of captured exchanges for one run.
#[derive(Debug, Clone)]
pub struct NetworkRecorder {
    patterns: Vec<UrlPattern>,
    entries: Vec<CapturedRequest>,
    max_entries: usize,
    body_limit: usize,
    dropped: usize,
}

impl NetworkRecorder {
    pub fn new(patterns: Vec<UrlPattern>, max_entries: usize, body_limit: usize) -> Self {
        Self {
            patterns,
            entries: Vec::new(),
            max_entries,
            body_limit,
            dropped: 0,
        }
    }

    /// Build from settings; a disabled capture yields a recorder that matches nothing.
    pub fn from_settings(settings: &CaptureSettings) -> Result<Self> {
        if !settings.enabled {
            return Ok(Self::disabled());
        }
        let patterns = settings
            .patterns
            .iter()
            .map(|p| UrlPattern::new(&p.tag, &p.pattern))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(patterns, settings.max_entries, settings.body_limit))
    }

    pub fn disabled() -> Self {
        Self::new(Vec::new(), 0, 0)
    }

    pub fn is_enabled(&self) -> bool {
        !self.patterns.is_empty() && self.max_entries > 0
    }

    /// Hook script with this recorder's body limit baked in.
    pub fn install_script(&self) -> String {
        INSTALL_SCRIPT
            .replace("__BODY_LIMIT__", &self.body_limit.to_string())
            .replace("__PAGE_CAP__", &PAGE_BUFFER_CAP.to_string())
    }

    /// Tag of the first pattern matching `url`.
    pub fn matching_tag(&self, url: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(url))
            .map(UrlPattern::tag)
    }

    /// Append an exchange if it matches a pattern and the log has room.
    pub fn record(&mut self, exchange: PageExchange) -> bool {
        let Some(tag) = self.matching_tag(&exchange.url).map(str::to_string) else {
            return false;
        };
        if self.entries.len() >= self.max_entries {
            if self.dropped == 0 {
                warn!(
                    target: "gavel.capture",
                    max_entries = self.max_entries,
                    "capture log full; further matches are counted but not kept"
                );
            }
            self.dropped += 1;
            return false;
        }
        let timestamp = exchange
            .timestamp_ms
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);
        debug!(
            target: "gavel.capture",
            kind = ?exchange.kind,
            url = %exchange.url,
            pattern = %tag,
            "captured exchange"
        );
        self.entries.push(CapturedRequest {
            kind: exchange.kind,
            url: exchange.url,
            method: exchange.method,
            request_body: exchange.request_body,
            response_body: exchange.response_body,
            status: exchange.status,
            timestamp,
            pattern: tag,
        });
        true
    }

    /// Feed the JSON array returned by [`DRAIN_SCRIPT`]. Returns the number kept.
    pub fn ingest(&mut self, drained: Value) -> usize {
        let Value::Array(items) = drained else {
            return 0;
        };
        let mut kept = 0;
        for item in items {
            match serde_json::from_value::<PageExchange>(item) {
                Ok(exchange) => {
                    if self.record(exchange) {
                        kept += 1;
                    }
                }
                Err(e) => {
                    debug!(target: "gavel.capture", error = %e, "skipping malformed exchange");
                }
            }
        }
        kept
    }

    pub fn entries(&self) -> &[CapturedRequest] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Matches that arrived after the log filled up.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Serialize the whole log as a pretty JSON array.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.entries).map_err(|e| GavelError::Io(e.into()))
    }

    /// Write the whole log as a JSON array, replacing any previous flush.
    pub async fn flush_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, self.to_json()?).await?;
        info!(
            target: "gavel.capture",
            path = %path.display(),
            entries = self.entries.len(),
            dropped = self.dropped,
            "network log flushed"
        );
        Ok(())
    }
}

/// Shared handle to a run's recorder.
///
/// Hook installation and draining are best-effort: a failing script is
/// logged and never interrupts navigation.
#[derive(Clone)]
pub struct RecorderHandle {
    inner: Arc<Mutex<NetworkRecorder>>,
}

impl RecorderHandle {
    pub fn new(recorder: NetworkRecorder) -> Self {
        Self {
            inner: Arc::new(Mutex::new(recorder)),
        }
    }

    /// Install the hook in the currently loaded document.
    pub async fn attach<P: PageHandle + ?Sized>(&self, page: &P) {
        let script = {
            let recorder = self.inner.lock().await;
            if !recorder.is_enabled() {
                return;
            }
            recorder.install_script()
        };
        if let Err(e) = page.execute(&script).await {
            debug!(target: "gavel.capture", error = %e, "hook install failed");
        }
    }

    /// Pull buffered exchanges out of the page. Returns the number kept.
    pub async fn drain<P: PageHandle + ?Sized>(&self, page: &P) -> usize {
        if !self.inner.lock().await.is_enabled() {
            return 0;
        }
        match page.execute(DRAIN_SCRIPT).await {
            Ok(value) => self.inner.lock().await.ingest(value),
            Err(e) => {
                debug!(target: "gavel.capture", error = %e, "drain failed");
                0
            }
        }
    }

    pub async fn entries(&self) -> Vec<CapturedRequest> {
        self.inner.lock().await.entries().to_vec()
    }

    /// `(kept, dropped)` counts.
    pub async fn counts(&self) -> (usize, usize) {
        let recorder = self.inner.lock().await;
        (recorder.len(), recorder.dropped())
    }

    pub async fn flush_to(&self, path: &Path) -> Result<()> {
        self.inner.lock().await.flush_to(path).await
    }

    /// Drain the page every `interval` until `cancel` fires.
    pub fn spawn_poller<P: PageHandle + 'static>(
        &self,
        page: Arc<P>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        handle.drain(page.as_ref()).await;
                    }
                }
            }
            debug!(target: "gavel.capture", "recorder poller stopped");
        })
    }
}
