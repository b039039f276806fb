//! Court-auction listing scraper.
//!
//! - Search form submission (`form`)
//! - Result table parsing and pagination (`parser`)
//! - Cell text normalization into typed records (`normalize`)
//! - Failure bundles for zero-record and errored runs (`diagnostic`)
//! - The run state machine tying them together (`run`)
//!
//! Everything site-specific comes from [`gavel_config::SiteProfile`]; this
//! crate holds no selectors of its own.

pub mod diagnostic;
pub mod form;
pub mod normalize;
pub mod parser;
pub mod run;

pub use diagnostic::{DiagnosticCapture, DiagnosticReport, DiagnosticTrigger};
pub use form::{SearchFormNavigator, SearchOutcome};
pub use normalize::{Batch, FieldNormalizer, Normalized};
pub use parser::{Harvest, PaginationStop, ParsedPage, ResultSetParser};
pub use run::{RunOutcome, RunOutput, RunState, Scraper};
