use crate::gavel_browser::readiness::{Readiness, NETWORK_IDLE_MS, READY_SCRIPT};
use async_trait::async_trait;
use fantoccini::{
    elements::Element,
    error::{CmdError, ErrorStatus},
    Client, Locator,
};
use gavel_common::{GavelError, Result};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Tallest window the full-page screenshot will resize to.
const MAX_SCREENSHOT_HEIGHT: u32 = 16_384;

/// Result of choosing an option in a `<select>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    Selected,
    ControlMissing,
    OptionMissing,
}

/// Operations the scraper needs from a loaded page.
///
/// Element lookups report absence as `false` / [`SelectOutcome`] instead of
/// an error, so callers can tell a restructured page apart from a broken
/// session. Every wait takes an explicit timeout.
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Start navigation to `url`.
    async fn goto(&self, url: &str) -> Result<()>;

    /// Wait until the document is complete and the network is quiet.
    async fn wait_ready(&self, timeout: Duration) -> Result<Readiness>;

    /// Wait for an element matching `css`; `false` when the timeout elapses.
    async fn wait_for(&self, css: &str, timeout: Duration) -> Result<bool>;

    /// Full page HTML source.
    async fn source(&self) -> Result<String>;

    /// Pick the option whose visible label equals `label` exactly.
    async fn select_by_label(&self, css: &str, label: &str) -> Result<SelectOutcome>;

    /// Set an input's value; `false` when the input is missing.
    async fn fill(&self, css: &str, value: &str) -> Result<bool>;

    /// Click the first element matching `css`; `false` when it is missing.
    async fn click(&self, css: &str) -> Result<bool>;

    /// Run a synchronous script body and return its value.
    async fn execute(&self, script: &str) -> Result<Value>;

    /// PNG screenshot of the whole document.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// End the browser session.
    async fn close(&self) -> Result<()>;
}

/// Map a WebDriver command error onto the shared error type.
pub(crate) fn classify(err: CmdError, action: &str) -> GavelError {
    match &err {
        CmdError::Lost(_) => GavelError::SessionCrashed(format!("{action}: {err}")),
        CmdError::Standard(wd)
            if matches!(
                wd.error,
                ErrorStatus::InvalidSessionId | ErrorStatus::SessionNotCreated
            ) =>
        {
            GavelError::SessionCrashed(format!("{action}: {err}"))
        }
        _ => GavelError::Driver(anyhow::Error::new(err).context(action.to_string())),
    }
}

/// fantoccini-backed [`PageHandle`].
#[derive(Clone)]
pub struct GavelPage {
    pub(crate) client: Client,
}

impl GavelPage {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn find(&self, css: &str) -> Result<Option<Element>> {
        match self.client.find(Locator::Css(css)).await {
            Ok(el) => Ok(Some(el)),
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(classify(e, "find element")),
        }
    }

    /// Grow the window to the document size so the screenshot covers the page.
    async fn expand_to_document(&self) {
        let size = self
            .client
            .execute(
                "return [document.documentElement.scrollWidth, document.documentElement.scrollHeight];",
                vec![],
            )
            .await;
        let dims = size.ok().and_then(|v| {
            let w = v.get(0)?.as_u64()?;
            let h = v.get(1)?.as_u64()?;
            Some((w as u32, (h as u32).min(MAX_SCREENSHOT_HEIGHT)))
        });
        if let Some((w, h)) = dims {
            if let Err(e) = self.client.set_window_size(w.max(800), h.max(600)).await {
                debug!(target: "gavel.session", error = %e, "window resize before screenshot failed");
            }
        }
    }
}

#[async_trait]
impl PageHandle for GavelPage {
    async fn goto(&self, url: &str) -> Result<()> {
        match self.client.goto(url).await {
            Ok(()) => Ok(()),
            Err(CmdError::Standard(wd)) if matches!(wd.error, ErrorStatus::Timeout) => {
                Err(GavelError::NavigationTimeout {
                    url: url.to_string(),
                    timeout_secs: 0,
                })
            }
            Err(e) => Err(classify(e, "navigate")),
        }
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<Readiness> {
        let timeout_ms = timeout.as_millis().min(u128::from(u64::MAX)) as u64;
        match self
            .client
            .execute_async(READY_SCRIPT, vec![json!(timeout_ms), json!(NETWORK_IDLE_MS)])
            .await
        {
            Ok(v) => serde_json::from_value(v)
                .map_err(|e| GavelError::Driver(anyhow::anyhow!("bad readiness payload: {e}"))),
            Err(CmdError::Standard(wd)) if matches!(wd.error, ErrorStatus::ScriptTimeout) => {
                Ok(Readiness::timed_out(timeout))
            }
            Err(e) => Err(classify(e, "wait for readiness")),
        }
    }

    async fn wait_for(&self, css: &str, timeout: Duration) -> Result<bool> {
        match self
            .client
            .wait()
            .at_most(timeout)
            .for_element(Locator::Css(css))
            .await
        {
            Ok(_) => Ok(true),
            Err(CmdError::WaitTimeout) => Ok(false),
            Err(e) => Err(classify(e, "wait for element")),
        }
    }

    async fn source(&self) -> Result<String> {
        self.client
            .source()
            .await
            .map_err(|e| classify(e, "read page source"))
    }

    async fn select_by_label(&self, css: &str, label: &str) -> Result<SelectOutcome> {
        let Some(select) = self.find(css).await? else {
            return Ok(SelectOutcome::ControlMissing);
        };
        match select.select_by_label(label).await {
            Ok(()) => Ok(SelectOutcome::Selected),
            Err(e) if e.is_no_such_element() => Ok(SelectOutcome::OptionMissing),
            Err(e) => Err(classify(e, "select option")),
        }
    }

    async fn fill(&self, css: &str, value: &str) -> Result<bool> {
        let Some(input) = self.find(css).await? else {
            return Ok(false);
        };
        // Date inputs on the site are read-only behind a picker, so the value
        // is assigned directly and a change event fired.
        let target = serde_json::to_value(&input)
            .map_err(|e| GavelError::Driver(anyhow::anyhow!("serialize element: {e}")))?;
        self.client
            .execute(
                "arguments[0].value = arguments[1];\
                 arguments[0].dispatchEvent(new Event('change', { bubbles: true }));\
                 return true;",
                vec![target, json!(value)],
            )
            .await
            .map_err(|e| classify(e, "fill input"))?;
        Ok(true)
    }

    async fn click(&self, css: &str) -> Result<bool> {
        let Some(el) = self.find(css).await? else {
            return Ok(false);
        };
        el.click().await.map_err(|e| classify(e, "click"))?;
        Ok(true)
    }

    async fn execute(&self, script: &str) -> Result<Value> {
        self.client
            .execute(script, vec![])
            .await
            .map_err(|e| classify(e, "execute script"))
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.expand_to_document().await;
        self.client
            .screenshot()
            .await
            .map_err(|e| classify(e, "screenshot"))
    }

    async fn close(&self) -> Result<()> {
        self.client
            .clone()
            .close()
            .await
            .map_err(|e| classify(e, "close session"))
    }
}
