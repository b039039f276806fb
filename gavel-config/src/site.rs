//! Declaration of the listing site's page structure.
//!
//! Everything that couples the scraper to the site's markup lives here:
//! form selectors, result-table selectors, and the column map. When the site
//! restructures, this file (or the `site:` section of `gavel.yaml`) is the
//! one place to edit.
use gavel_common::model::Field;
use serde::{Deserialize, Serialize};

/// Root of the site declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    /// Page holding the court/date search form.
    pub search_url: String,
    pub form: FormLocators,
    pub results: ResultSelectors,
    pub columns: ColumnMap,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            search_url: "https://www.courtauction.go.kr/RetrieveRealEstMulDetailList.laf"
                .to_string(),
            form: FormLocators::default(),
            results: ResultSelectors::default(),
            columns: ColumnMap::default(),
        }
    }
}

/// CSS selectors for the search form controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormLocators {
    /// `<select>` listing the courts; options are matched by exact label.
    pub court_select: String,
    pub date_from: String,
    pub date_to: String,
    pub submit: String,
}

impl Default for FormLocators {
    fn default() -> Self {
        Self {
            court_select: "select[name='jiwonNm']".to_string(),
            date_from: "input[name='termStartDt']".to_string(),
            date_to: "input[name='termEndDt']".to_string(),
            submit: "a[href*='srchJiwonSearch']".to_string(),
        }
    }
}

/// CSS selectors for the result table and its pager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultSelectors {
    /// Presence of this element means the results have rendered.
    pub table: String,
    pub rows: String,
    pub header_cells: String,
    /// Enabled "next page" affordance. Absent on the last page.
    pub next_page: String,
}

impl Default for ResultSelectors {
    fn default() -> Self {
        Self {
            table: "table.Ltbl_list".to_string(),
            rows: "table.Ltbl_list tbody tr".to_string(),
            header_cells: "table.Ltbl_list thead th".to_string(),
            next_page: "div.page2 a.next".to_string(),
        }
    }
}

/// Location of one field inside a result row.
///
/// `line` selects the n-th non-empty text line of the cell (cells on the
/// site stack two values separated by `<br>`); `None` joins all lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRef {
    pub column: usize,
    #[serde(default)]
    pub line: Option<usize>,
}

impl CellRef {
    pub const fn col(column: usize) -> Self {
        Self { column, line: None }
    }

    pub const fn line(column: usize, line: usize) -> Self {
        Self {
            column,
            line: Some(line),
        }
    }
}

/// Expected header text for a column, checked before rows are read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderCheck {
    pub column: usize,
    pub contains: String,
}

/// Named mapping from record fields to result-table cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub case_number: CellRef,
    pub item_number: CellRef,
    pub address: CellRef,
    pub property_type: CellRef,
    pub appraisal_value: CellRef,
    pub minimum_sale_price: CellRef,
    pub auction_date: CellRef,
    pub status: CellRef,
    pub failure_count: CellRef,
    pub headers: Vec<HeaderCheck>,
}

impl ColumnMap {
    /// Layout of the real-estate result table:
    ///
    /// | # | cell                         |
    /// |---|------------------------------|
    /// | 0 | selection checkbox           |
    /// | 1 | court / case number          |
    /// | 2 | item number                  |
    /// | 3 | address and details          |
    /// | 4 | property type                |
    /// | 5 | appraisal / minimum price    |
    /// | 6 | department / auction date    |
    /// | 7 | status with failure count    |
    pub fn court_auction() -> Self {
        Self {
            case_number: CellRef::line(1, 1),
            item_number: CellRef::col(2),
            address: CellRef::col(3),
            property_type: CellRef::col(4),
            appraisal_value: CellRef::line(5, 0),
            minimum_sale_price: CellRef::line(5, 1),
            auction_date: CellRef::line(6, 1),
            status: CellRef::col(7),
            failure_count: CellRef::col(7),
            headers: vec![
                HeaderCheck {
                    column: 1,
                    contains: "사건번호".to_string(),
                },
                HeaderCheck {
                    column: 2,
                    contains: "물건번호".to_string(),
                },
                HeaderCheck {
                    column: 5,
                    contains: "감정평가액".to_string(),
                },
                HeaderCheck {
                    column: 6,
                    contains: "매각기일".to_string(),
                },
            ],
        }
    }

    pub fn get(&self, field: Field) -> CellRef {
        match field {
            Field::CaseNumber => self.case_number,
            Field::ItemNumber => self.item_number,
            Field::Address => self.address,
            Field::PropertyType => self.property_type,
            Field::AppraisalValue => self.appraisal_value,
            Field::MinimumSalePrice => self.minimum_sale_price,
            Field::AuctionDate => self.auction_date,
            Field::Status => self.status,
            Field::FailureCount => self.failure_count,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (Field, CellRef)> + '_ {
        Field::ALL.into_iter().map(|f| (f, self.get(f)))
    }
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self::court_auction()
    }
}
