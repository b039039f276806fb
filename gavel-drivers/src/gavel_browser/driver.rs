use crate::gavel_browser::{
    page::{classify, GavelPage, PageHandle},
    readiness::Readiness,
    stealth::{build_launch_arguments, StealthScripts},
};
use fantoccini::{wd::TimeoutConfiguration, ClientBuilder};
use gavel_common::{GavelError, Result};
use gavel_config::BrowserSettings;
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use webdriver::capabilities::Capabilities;

/// Floor for the readiness wait that follows a slow `goto`.
const MIN_READY_WAIT: Duration = Duration::from_secs(1);

/// One browser session, owned by exactly one run.
///
/// Cloning is cheap and shares the same page; the session is still closed
/// once, by whoever holds the value passed to [`Session::close`].
pub struct Session<P: PageHandle> {
    page: Arc<P>,
    navigation_timeout: Duration,
}

impl<P: PageHandle> Clone for Session<P> {
    fn clone(&self) -> Self {
        Self {
            page: Arc::clone(&self.page),
            navigation_timeout: self.navigation_timeout,
        }
    }
}

impl Session<GavelPage> {
    /// Start a WebDriver session with the configured launch flags.
    pub async fn open(settings: &BrowserSettings) -> Result<Self> {
        let mut caps = Capabilities::new();
        let mut chrome_opts = HashMap::new();
        chrome_opts.insert("args".to_string(), json!(build_launch_arguments(settings)));
        caps.insert("goog:chromeOptions".to_string(), json!(chrome_opts));

        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(&settings.webdriver_url)
            .await
            .map_err(|e| {
                GavelError::SessionCrashed(format!(
                    "could not start a WebDriver session at {}: {e}",
                    settings.webdriver_url
                ))
            })?;

        let nav = settings.navigation_timeout();
        // Script timeout must outlive the readiness wait, which can use the full budget.
        client
            .update_timeouts(TimeoutConfiguration::new(
                Some(nav + Duration::from_secs(5)),
                Some(nav),
                None,
            ))
            .await
            .map_err(|e| classify(e, "set timeouts"))?;

        info!(
            target: "gavel.session",
            webdriver = %settings.webdriver_url,
            headless = settings.headless,
            timeout_secs = settings.navigation_timeout_secs,
            "browser session opened"
        );
        Ok(Self::from_page(GavelPage::new(client), nav))
    }
}

impl<P: PageHandle> Session<P> {
    /// Wrap an existing page handle.
    pub fn from_page(page: P, navigation_timeout: Duration) -> Self {
        Self {
            page: Arc::new(page),
            navigation_timeout,
        }
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    /// Shared handle for observers that run beside the session (the recorder poller).
    pub fn shared_page(&self) -> Arc<P> {
        Arc::clone(&self.page)
    }

    pub fn navigation_timeout(&self) -> Duration {
        self.navigation_timeout
    }

    /// Navigate and wait for the page to become ready.
    ///
    /// Returns [`GavelError::NavigationTimeout`] when the document does not
    /// load within the navigation timeout. A document that loaded but never
    /// went network-idle is accepted with a warning.
    pub async fn navigate(&self, url: &str) -> Result<Readiness> {
        let started = Instant::now();
        let timed_out = || GavelError::NavigationTimeout {
            url: url.to_string(),
            timeout_secs: self.navigation_timeout.as_secs(),
        };

        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Err(_) | Ok(Err(GavelError::NavigationTimeout { .. })) => return Err(timed_out()),
            Ok(res) => res?,
        }

        let remaining = self
            .navigation_timeout
            .saturating_sub(started.elapsed())
            .max(MIN_READY_WAIT);
        let readiness = self.page.wait_ready(remaining).await?;
        if !readiness.dom_ready {
            return Err(timed_out());
        }
        if !readiness.network_idle {
            warn!(
                target: "gavel.session",
                %url,
                waited_ms = readiness.waited_ms,
                "document loaded but network never went idle"
            );
        }

        if let Err(e) = self.page.execute(StealthScripts::core_evasions()).await {
            debug!(target: "gavel.session", error = %e, "evasion script failed");
        }
        debug!(target: "gavel.session", %url, waited_ms = readiness.waited_ms, "navigation settled");
        Ok(readiness)
    }

    /// Wait for the page to settle after an in-page action (submit, pager click).
    pub async fn settle(&self, timeout: Duration) -> Result<Readiness> {
        let readiness = self.page.wait_ready(timeout).await?;
        if !readiness.network_idle {
            debug!(
                target: "gavel.session",
                dom_ready = readiness.dom_ready,
                waited_ms = readiness.waited_ms,
                "page did not settle before timeout"
            );
        }
        Ok(readiness)
    }

    /// Close the underlying browser session.
    pub async fn close(self) -> Result<()> {
        self.page.close().await?;
        debug!(target: "gavel.session", "browser session closed");
        Ok(())
    }

    /// Run `f` with this session and close it afterwards, whatever `f` returned.
    pub async fn scoped<T, F, Fut>(self, f: F) -> Result<T>
    where
        F: FnOnce(Session<P>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let out = f(self.clone()).await;
        if let Err(e) = self.close().await {
            warn!(target: "gavel.session", error = %e, "failed to close browser session");
        }
        out
    }
}
