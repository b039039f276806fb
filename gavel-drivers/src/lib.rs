//! Driver layer for browser automation against the auction listing site.
//!
//! This crate owns everything that talks to the browser. Callers get an
//! explicitly owned [`gavel_browser::driver::Session`] instead of a global
//! browser, and program against the [`gavel_browser::page::PageHandle`]
//! trait so tests can substitute a scripted page.
//!
//! - [`gavel_browser::driver::Session`]: scoped session with timed navigation
//! - [`gavel_browser::page::GavelPage`]: fantoccini-backed page handle
//! - [`gavel_browser::readiness`]: in-page DOM/network idle wait
//! - [`gavel_browser::recorder`]: passive fetch/XHR capture for API discovery
//! - [`gavel_browser::stealth`]: launch arguments and automation masking
pub mod gavel_browser;
