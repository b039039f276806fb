//! Raw cell text → typed [`PropertyRecord`].
//!
//! Cell formatting on the listing site varies between item types, so every
//! field degrades on its own: a bad value becomes `None` (or a documented
//! default) plus a [`ParseFailure`], and the row is always kept.
use std::collections::HashSet;

use chrono::NaiveDate;
use gavel_common::model::{
    AuctionStatus, FailureTag, Field, ParseFailure, PropertyRecord, RawRow, SITE_DATE_FORMAT,
    WON_SUFFIX,
};
use serde::Serialize;
use tracing::debug;

/// Item number assumed when the cell is blank (single-item cases).
pub const DEFAULT_ITEM_NUMBER: u32 = 1;

/// A record plus the field-level failures found while building it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub record: PropertyRecord,
    pub failures: Vec<ParseFailure>,
}

/// Normalized output of a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Batch {
    pub records: Vec<PropertyRecord>,
    pub failures: Vec<ParseFailure>,
    /// Rows dropped because their case/item key was already seen.
    pub duplicates: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FieldNormalizer;

impl FieldNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, raw: &RawRow) -> Normalized {
        let mut failures = Vec::new();
        let mut fail = |field: Field, tag: FailureTag, reason: String| {
            failures.push(ParseFailure::new(raw, field, tag, reason));
        };

        let case_number = match raw.get(Field::CaseNumber) {
            Some(v) => collapse_whitespace(v),
            None => {
                fail(Field::CaseNumber, FailureTag::Missing, "case number cell is empty".into());
                String::new()
            }
        };

        let item_number = match raw.get(Field::ItemNumber) {
            None => DEFAULT_ITEM_NUMBER,
            Some(v) => match v.trim().parse::<u32>() {
                Ok(n) => n,
                Err(_) => {
                    fail(
                        Field::ItemNumber,
                        FailureTag::Number,
                        format!("item number {v:?} is not a number"),
                    );
                    DEFAULT_ITEM_NUMBER
                }
            },
        };

        let mut currency = |field: Field| match raw.get(field) {
            None => {
                fail(field, FailureTag::Currency, "amount cell is empty".into());
                None
            }
            Some(v) => match parse_currency(v) {
                Ok(amount) => Some(amount),
                Err(reason) => {
                    fail(field, FailureTag::Currency, reason);
                    None
                }
            },
        };
        let appraisal_value = currency(Field::AppraisalValue);
        let mut minimum_sale_price = currency(Field::MinimumSalePrice);

        if let (Some(min), Some(appraisal)) = (minimum_sale_price, appraisal_value) {
            if min > appraisal {
                fail(
                    Field::MinimumSalePrice,
                    FailureTag::Currency,
                    format!("minimum sale price {min} exceeds appraisal value {appraisal}"),
                );
                minimum_sale_price = None;
            }
        }

        let auction_date = match raw.get(Field::AuctionDate) {
            None => {
                fail(Field::AuctionDate, FailureTag::Date, "auction date cell is empty".into());
                None
            }
            Some(v) => match parse_site_date(v) {
                Ok(date) => Some(date),
                Err(reason) => {
                    fail(Field::AuctionDate, FailureTag::Date, reason);
                    None
                }
            },
        };

        let status = match raw.get(Field::Status) {
            None => {
                fail(Field::Status, FailureTag::Status, "status cell is empty".into());
                AuctionStatus::Scheduled
            }
            Some(v) => parse_status(v).unwrap_or_else(|| {
                fail(Field::Status, FailureTag::Status, format!("unknown status {v:?}"));
                AuctionStatus::Scheduled
            }),
        };

        let failure_count = match raw.get(Field::FailureCount).map(parse_failure_count) {
            None | Some(Ok(None)) => 0,
            Some(Ok(Some(n))) => n,
            Some(Err(reason)) => {
                fail(Field::FailureCount, FailureTag::Count, reason);
                0
            }
        };

        let record = PropertyRecord {
            case_number,
            item_number,
            address: raw.get(Field::Address).map(collapse_whitespace),
            property_type: raw.get(Field::PropertyType).map(collapse_whitespace),
            appraisal_value,
            minimum_sale_price,
            auction_date,
            failure_count,
            status,
        };

        Normalized { record, failures }
    }

    /// Normalize every row, keeping the first record seen for each key.
    ///
    /// Only rows whose case and item numbers were actually read take part in
    /// de-duplication; a key built from defaults is never trusted. Failures
    /// of a dropped duplicate are still reported.
    pub fn normalize_all(&self, rows: &[RawRow]) -> Batch {
        let mut batch = Batch::default();
        let mut seen = HashSet::new();
        for raw in rows {
            let Normalized { record, failures } = self.normalize(raw);
            let keyed = !failures.iter().any(|f| {
                matches!(
                    (f.field, f.tag),
                    (Field::CaseNumber, FailureTag::Missing) | (Field::ItemNumber, FailureTag::Number)
                )
            });
            batch.failures.extend(failures);
            if keyed && !seen.insert(record.key()) {
                debug!(
                    target: "gavel.normalize",
                    case = %record.case_number,
                    item = record.item_number,
                    "duplicate listing skipped"
                );
                batch.duplicates += 1;
                continue;
            }
            batch.records.push(record);
        }
        batch
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse `123,456,789원` (optionally followed by a parenthesised note) into won.
pub fn parse_currency(text: &str) -> Result<u64, String> {
    let head = text.split('(').next().unwrap_or_default();
    let cleaned: String = head
        .trim()
        .trim_end_matches(WON_SUFFIX)
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("amount {text:?} is not numeric"));
    }
    cleaned
        .parse::<u64>()
        .map_err(|e| format!("amount {text:?} out of range: {e}"))
}

/// Parse the site's `YYYY.MM.DD` date, ignoring any trailing time or note.
pub fn parse_site_date(text: &str) -> Result<NaiveDate, String> {
    let token = text
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|t| !t.is_empty())
        .unwrap_or_default();
    NaiveDate::parse_from_str(token, SITE_DATE_FORMAT)
        .map_err(|e| format!("date {text:?} does not match {SITE_DATE_FORMAT}: {e}"))
}

/// Read a trailing `N회` count. `Ok(None)` when the text carries no count.
pub fn parse_failure_count(text: &str) -> Result<Option<u32>, String> {
    let Some(rest) = text.trim_end().strip_suffix('회') else {
        return Ok(None);
    };
    let rest = rest.trim_end();
    let start = rest
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);
    match start {
        None => Ok(None),
        Some(i) => rest[i..]
            .parse::<u32>()
            .map(Some)
            .map_err(|e| format!("failure count in {text:?} out of range: {e}")),
    }
}

/// Map a status cell to an [`AuctionStatus`].
///
/// Withdrawal keywords are checked first because cells such as `미진행`
/// also contain the "in progress" keyword.
pub fn parse_status(text: &str) -> Option<AuctionStatus> {
    const WITHDRAWN: [&str; 6] = ["취하", "취소", "기각", "정지", "변경", "미진행"];

    let t = text.trim();
    if WITHDRAWN.iter().any(|k| t.contains(k)) {
        return Some(AuctionStatus::Withdrawn);
    }
    if t.contains("유찰") {
        return Some(AuctionStatus::Failed);
    }
    if t.contains("매각") || t.contains("낙찰") {
        return Some(AuctionStatus::Sold);
    }
    if t.contains("신건") {
        return Some(AuctionStatus::Scheduled);
    }
    if t.contains("진행") {
        return Some(AuctionStatus::Active);
    }
    let word = t.split_whitespace().next().unwrap_or_default().to_ascii_lowercase();
    [
        AuctionStatus::Scheduled,
        AuctionStatus::Active,
        AuctionStatus::Sold,
        AuctionStatus::Failed,
        AuctionStatus::Withdrawn,
    ]
    .into_iter()
    .find(|s| s.as_str() == word)
}
