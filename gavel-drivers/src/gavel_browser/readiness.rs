//! Page readiness signal.
//!
//! Readiness is decided inside the page: the document must be `complete` and
//! the number of loaded resources must stay flat for a short quiet window.
//! The script resolves through the WebDriver async-script callback, so the
//! caller waits on an event rather than sleeping for a fixed duration.
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    /// `document.readyState` left `loading` before the deadline.
    pub dom_ready: bool,
    /// Resource count stayed flat for the quiet window.
    pub network_idle: bool,
    pub waited_ms: u64,
}

impl Readiness {
    pub fn settled(waited_ms: u64) -> Self {
        Self {
            dom_ready: true,
            network_idle: true,
            waited_ms,
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            dom_ready: false,
            network_idle: false,
            waited_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
        }
    }
}

/// Quiet window the resource count has to hold before the page counts as idle.
pub const NETWORK_IDLE_MS: u64 = 500;

/// Async script body; `arguments[0]` is the timeout in milliseconds.
pub const READY_SCRIPT: &str = r#"
    const timeoutMs = arguments[0];
    const idleMs = arguments[1];
    const done = arguments[arguments.length - 1];
    const interval = 100;
    const start = Date.now();
    let last = -1;
    let stable = 0;
    const count = () => {
        try { return performance.getEntriesByType('resource').length; } catch (_) { return 0; }
    };
    const tick = () => {
        const waited = Date.now() - start;
        const complete = document.readyState === 'complete';
        const cur = count();
        stable = (complete && cur === last) ? stable + interval : 0;
        last = cur;
        if (complete && stable >= idleMs) {
            return done({ dom_ready: true, network_idle: true, waited_ms: waited });
        }
        if (waited >= timeoutMs) {
            return done({
                dom_ready: document.readyState !== 'loading',
                network_idle: false,
                waited_ms: waited
            });
        }
        setTimeout(tick, interval);
    };
    tick();
"#;
