//! Auction listing domain model.
//!
//! Everything here lives for a single run. Persistence, scoring and webhook
//! dispatch consume these types downstream.
use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{GavelError, Result};

/// Date format used by the listing site for both form inputs and table cells.
pub const SITE_DATE_FORMAT: &str = "%Y.%m.%d";

/// Currency suffix printed after amounts on the listing site.
pub const WON_SUFFIX: char = '원';

/// A named cell of a result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    CaseNumber,
    ItemNumber,
    Address,
    PropertyType,
    AppraisalValue,
    MinimumSalePrice,
    AuctionDate,
    Status,
    FailureCount,
}

impl Field {
    pub const ALL: [Field; 9] = [
        Field::CaseNumber,
        Field::ItemNumber,
        Field::Address,
        Field::PropertyType,
        Field::AppraisalValue,
        Field::MinimumSalePrice,
        Field::AuctionDate,
        Field::Status,
        Field::FailureCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::CaseNumber => "case_number",
            Field::ItemNumber => "item_number",
            Field::Address => "address",
            Field::PropertyType => "property_type",
            Field::AppraisalValue => "appraisal_value",
            Field::MinimumSalePrice => "minimum_sale_price",
            Field::AuctionDate => "auction_date",
            Field::Status => "status",
            Field::FailureCount => "failure_count",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an auction item as shown in the result table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Scheduled,
    Active,
    Sold,
    Failed,
    Withdrawn,
}

impl AuctionStatus {
    /// Label the listing site prints for this status.
    pub fn site_label(&self) -> &'static str {
        match self {
            AuctionStatus::Scheduled => "신건",
            AuctionStatus::Active => "진행",
            AuctionStatus::Sold => "매각",
            AuctionStatus::Failed => "유찰",
            AuctionStatus::Withdrawn => "취하",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Scheduled => "scheduled",
            AuctionStatus::Active => "active",
            AuctionStatus::Sold => "sold",
            AuctionStatus::Failed => "failed",
            AuctionStatus::Withdrawn => "withdrawn",
        }
    }
}

/// Unique key of a listing: case number plus item number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordKey {
    pub case_number: String,
    pub item_number: u32,
}

/// One normalized auction listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub case_number: String,
    pub item_number: u32,
    pub address: Option<String>,
    pub property_type: Option<String>,
    /// Appraisal value in won.
    pub appraisal_value: Option<u64>,
    /// Minimum sale price in won. Never above `appraisal_value`.
    pub minimum_sale_price: Option<u64>,
    pub auction_date: Option<NaiveDate>,
    pub failure_count: u32,
    pub status: AuctionStatus,
}

impl PropertyRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            case_number: self.case_number.clone(),
            item_number: self.item_number,
        }
    }

    /// Render the record back into the text the listing site shows for it.
    pub fn to_raw_row(&self) -> RawRow {
        let status = if self.failure_count > 0 {
            format!("{} {}회", self.status.site_label(), self.failure_count)
        } else {
            self.status.site_label().to_string()
        };

        let mut row = RawRow::default();
        if !self.case_number.is_empty() {
            row.set(Field::CaseNumber, self.case_number.clone());
        }
        row.set(Field::ItemNumber, self.item_number.to_string());
        if let Some(address) = &self.address {
            row.set(Field::Address, address.clone());
        }
        if let Some(kind) = &self.property_type {
            row.set(Field::PropertyType, kind.clone());
        }
        if let Some(v) = self.appraisal_value {
            row.set(Field::AppraisalValue, format_won(v));
        }
        if let Some(v) = self.minimum_sale_price {
            row.set(Field::MinimumSalePrice, format_won(v));
        }
        if let Some(date) = self.auction_date {
            row.set(
                Field::AuctionDate,
                date.format(SITE_DATE_FORMAT).to_string(),
            );
        }
        row.set(Field::FailureCount, status.clone());
        row.set(Field::Status, status);
        row.snapshot = row.fields.values().cloned().collect();
        row
    }
}

/// Format an amount the way the site prints it: `123,456,789원`.
pub fn format_won(amount: u64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out.push(WON_SUFFIX);
    out
}

/// Unparsed cell text of one result-table row, keyed by field.
///
/// Fields whose cell was absent or blank are simply not present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawRow {
    fields: BTreeMap<Field, String>,
    snapshot: Vec<String>,
}

impl RawRow {
    /// Start a row from the full cell snapshot of the table row.
    pub fn new(snapshot: Vec<String>) -> Self {
        Self {
            fields: BTreeMap::new(),
            snapshot,
        }
    }

    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    /// Store a cell value; blank text is treated as absent.
    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, trimmed.to_string());
        }
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn snapshot(&self) -> &[String] {
        &self.snapshot
    }

    /// Text used to fingerprint the row for duplicate-page detection.
    pub fn fingerprint_text(&self) -> String {
        self.snapshot.join("\u{1f}")
    }
}

/// Why a single field could not be normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureTag {
    Currency,
    Date,
    Count,
    Status,
    Number,
    Missing,
}

/// A field-level normalization error. The row it came from is still kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseFailure {
    /// Cell snapshot of the row the failure came from.
    pub row: Vec<String>,
    pub field: Field,
    pub tag: FailureTag,
    pub reason: String,
}

impl ParseFailure {
    pub fn new(raw: &RawRow, field: Field, tag: FailureTag, reason: impl Into<String>) -> Self {
        Self {
            row: raw.snapshot().to_vec(),
            field,
            tag,
            reason: reason.into(),
        }
    }
}

/// Court and date range for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchCriteria {
    court: String,
    from: NaiveDate,
    to: NaiveDate,
    page_cap: Option<u32>,
}

impl SearchCriteria {
    /// Build criteria for `court` over the inclusive range `from..=to`.
    pub fn new(court: impl Into<String>, from: NaiveDate, to: NaiveDate) -> Result<Self> {
        let court = court.into().trim().to_string();
        if court.is_empty() {
            return Err(GavelError::InvalidCriteria("court name is empty".into()));
        }
        if from > to {
            return Err(GavelError::InvalidCriteria(format!(
                "date range is inverted: {from} > {to}"
            )));
        }
        Ok(Self {
            court,
            from,
            to,
            page_cap: None,
        })
    }

    /// Cap the number of result pages visited. A cap of zero is raised to one.
    pub fn with_page_cap(mut self, cap: u32) -> Self {
        self.page_cap = Some(cap.max(1));
        self
    }

    pub fn court(&self) -> &str {
        &self.court
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    pub fn page_cap(&self) -> Option<u32> {
        self.page_cap
    }

    pub fn effective_page_cap(&self, default: u32) -> u32 {
        self.page_cap.unwrap_or(default).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn formats_won_with_separators() {
        assert_eq!(format_won(0), "0원");
        assert_eq!(format_won(999), "999원");
        assert_eq!(format_won(1_000), "1,000원");
        assert_eq!(format_won(123_456_789), "123,456,789원");
    }

    #[test]
    fn criteria_rejects_inverted_range() {
        let err = SearchCriteria::new("서울중앙지방법원", date(2025, 2, 1), date(2025, 1, 1))
            .unwrap_err();
        assert!(matches!(err, GavelError::InvalidCriteria(_)));
    }

    #[test]
    fn criteria_rejects_blank_court() {
        assert!(SearchCriteria::new("  ", date(2025, 1, 1), date(2025, 1, 1)).is_err());
    }

    #[test]
    fn zero_page_cap_is_raised() {
        let c = SearchCriteria::new("부산지방법원", date(2025, 1, 1), date(2025, 1, 31))
            .unwrap()
            .with_page_cap(0);
        assert_eq!(c.page_cap(), Some(1));
    }

    #[test]
    fn raw_row_treats_blank_as_absent() {
        let row = RawRow::new(vec![]).with(Field::Address, "   ");
        assert_eq!(row.get(Field::Address), None);
    }

    #[test]
    fn renders_failed_status_with_count() {
        let record = PropertyRecord {
            case_number: "2024타경1234".into(),
            item_number: 2,
            address: None,
            property_type: None,
            appraisal_value: Some(100_000_000),
            minimum_sale_price: Some(64_000_000),
            auction_date: Some(date(2025, 1, 15)),
            failure_count: 2,
            status: AuctionStatus::Failed,
        };
        let row = record.to_raw_row();
        assert_eq!(row.get(Field::Status), Some("유찰 2회"));
        assert_eq!(row.get(Field::AuctionDate), Some("2025.01.15"));
        assert_eq!(row.get(Field::MinimumSalePrice), Some("64,000,000원"));
    }
}
