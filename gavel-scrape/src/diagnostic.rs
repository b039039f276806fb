//! Failure bundles: screenshot, network log, and run context.
//!
//! Capture is best-effort throughout. A step that fails is logged and
//! skipped; capturing never changes the outcome of the run it describes.
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use gavel_common::ErrorClass;
use gavel_common::model::SearchCriteria;
use gavel_config::DiagnosticsSettings;
use gavel_drivers::gavel_browser::{page::PageHandle, recorder::RecorderHandle};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::run::RunState;

pub const SCREENSHOT_FILE: &str = "screenshot.png";
pub const NETWORK_LOG_FILE: &str = "network.json";
pub const CONTEXT_FILE: &str = "context.json";

const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a bundle was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticTrigger {
    ZeroRecords,
    Error { class: ErrorClass, message: String },
}

/// Files written for one bundle. A `None` entry was skipped or failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticReport {
    pub dir: PathBuf,
    pub screenshot: Option<PathBuf>,
    pub network_log: Option<PathBuf>,
    pub context: Option<PathBuf>,
}

#[derive(Serialize)]
struct BundleContext<'a> {
    run_id: Uuid,
    captured_at: DateTime<Utc>,
    trigger: &'a DiagnosticTrigger,
    /// State the run was in when capture began.
    state: RunState,
    criteria: &'a SearchCriteria,
    captured_requests: usize,
    dropped_requests: usize,
}

#[derive(Debug, Clone)]
pub struct DiagnosticCapture {
    root: PathBuf,
    enabled: bool,
}

impl DiagnosticCapture {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            enabled: true,
        }
    }

    pub fn from_settings(settings: &DiagnosticsSettings) -> Self {
        Self {
            root: settings.dir.clone(),
            enabled: settings.enabled,
        }
    }

    pub fn disabled() -> Self {
        Self {
            root: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn bundle_dir(&self, run_id: Uuid) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    /// Write a bundle for `run_id`. Without a page there is no screenshot.
    pub async fn capture(
        &self,
        run_id: Uuid,
        page: Option<&dyn PageHandle>,
        recorder: &RecorderHandle,
        trigger: &DiagnosticTrigger,
        state: RunState,
        criteria: &SearchCriteria,
    ) -> Option<DiagnosticReport> {
        if !self.enabled {
            info!(target: "gavel.diagnostic", %run_id, "diagnostics disabled; nothing captured");
            return None;
        }

        let dir = self.bundle_dir(run_id);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(target: "gavel.diagnostic", dir = %dir.display(), error = %e, "cannot create bundle directory");
            return None;
        }
        let mut report = DiagnosticReport {
            dir: dir.clone(),
            ..DiagnosticReport::default()
        };

        if let Some(page) = page {
            recorder.drain(page).await;
            report.screenshot = screenshot(page, &dir.join(SCREENSHOT_FILE)).await;
        }

        let network = dir.join(NETWORK_LOG_FILE);
        match recorder.flush_to(&network).await {
            Ok(()) => report.network_log = Some(network),
            Err(e) => warn!(target: "gavel.diagnostic", error = %e, "network log not written"),
        }

        let (captured_requests, dropped_requests) = recorder.counts().await;
        let context = BundleContext {
            run_id,
            captured_at: Utc::now(),
            trigger,
            state,
            criteria,
            captured_requests,
            dropped_requests,
        };
        let path = dir.join(CONTEXT_FILE);
        match write_json(&path, &context).await {
            Ok(()) => report.context = Some(path),
            Err(e) => warn!(target: "gavel.diagnostic", error = %e, "context not written"),
        }

        info!(
            target: "gavel.diagnostic",
            %run_id,
            dir = %dir.display(),
            screenshot = report.screenshot.is_some(),
            "diagnostic bundle written"
        );
        Some(report)
    }
}

async fn screenshot(page: &dyn PageHandle, path: &Path) -> Option<PathBuf> {
    let png = match tokio::time::timeout(SCREENSHOT_TIMEOUT, page.screenshot()).await {
        Ok(Ok(png)) => png,
        Ok(Err(e)) => {
            warn!(target: "gavel.diagnostic", error = %e, "screenshot failed");
            return None;
        }
        Err(_) => {
            warn!(target: "gavel.diagnostic", "screenshot timed out");
            return None;
        }
    };
    match tokio::fs::write(path, png).await {
        Ok(()) => Some(path.to_path_buf()),
        Err(e) => {
            warn!(target: "gavel.diagnostic", error = %e, "screenshot not written");
            None
        }
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let body = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    tokio::fs::write(path, body).await
}
