//! Common types and utilities shared across Gavel crates.
//!
//! This crate defines the auction listing domain model, the shared error
//! type, and observability helpers used throughout the Gavel workspace. It is
//! intentionally lightweight so that every crate can depend on it without
//! pulling the browser or HTML stacks along.
//!
//! # Overview
//!
//! - [`model`]: records, raw rows, parse failures, and search criteria
//! - [`observability`]: Centralised tracing/logging initialisation
//! - [`GavelError`] and [`Result`]: Shared error handling
//!
//! # Examples
//!
//! Building search criteria for a single court and month:
//!
//! ```rust
//! use chrono::NaiveDate;
//! use gavel_common::model::SearchCriteria;
//!
//! let criteria = SearchCriteria::new(
//!     "부산지방법원",
//!     NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
//! )
//! .unwrap()
//! .with_page_cap(5);
//!
//! assert_eq!(criteria.court(), "부산지방법원");
//! assert_eq!(criteria.effective_page_cap(50), 5);
//! ```
use serde::Serialize;

pub mod model;
pub mod observability;

/// How far an error is allowed to travel.
///
/// Structural errors mean the page no longer looks the way the site
/// declaration expects; the run finishes with zero records and a diagnostic
/// bundle. Fatal errors abort the run and reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Fatal,
    Structural,
}

/// Error types used across the Gavel system.
#[derive(thiserror::Error, Debug)]
pub enum GavelError {
    /// Navigation did not reach a ready document in time.
    #[error("navigation to {url} timed out after {timeout_secs}s")]
    NavigationTimeout { url: String, timeout_secs: u64 },

    /// The WebDriver session is gone; nothing more can be done in this run.
    #[error("browser session crashed: {0}")]
    SessionCrashed(String),

    /// The court selector or the requested court option is missing.
    #[error("court not found in search form: {0}")]
    CourtNotFound(String),

    /// A date input or the submit control is missing.
    #[error("search control not found: {0}")]
    SearchControlNotFound(String),

    /// The result table header no longer matches the column map.
    #[error("column map mismatch in column {column}: expected header containing {expected:?}, found {found:?}")]
    ColumnMapMismatch {
        column: usize,
        expected: String,
        found: Option<String>,
    },

    /// Search criteria failed validation.
    #[error("invalid search criteria: {0}")]
    InvalidCriteria(String),

    /// A driver (browser, scripting, etc.) reported an error.
    #[error("Driver error: {0}")]
    Driver(#[from] anyhow::Error),

    /// Configuration was incomplete or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GavelError {
    /// Classify the error for run-level handling.
    pub fn class(&self) -> ErrorClass {
        match self {
            GavelError::CourtNotFound(_)
            | GavelError::SearchControlNotFound(_)
            | GavelError::ColumnMapMismatch { .. } => ErrorClass::Structural,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn is_structural(&self) -> bool {
        self.class() == ErrorClass::Structural
    }
}

/// Convenient alias for results that use [`GavelError`].
pub type Result<T> = std::result::Result<T, GavelError>;
