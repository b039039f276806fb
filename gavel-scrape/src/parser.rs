//! Result-table parsing and pagination.
//!
//! Rows are read through the named [`ColumnMap`], never by bare index, and
//! the header row is checked against the map before any row is trusted.
use std::time::Duration;

use gavel_common::model::RawRow;
use gavel_common::{GavelError, Result};
use gavel_config::{ColumnMap, ResultSelectors};
use gavel_drivers::gavel_browser::{
    driver::Session, page::PageHandle, recorder::RecorderHandle,
};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One parsed result page.
#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub rows: Vec<RawRow>,
    pub has_next_page: bool,
    /// blake3 digest of the page's row contents.
    pub fingerprint: String,
}

/// Why pagination ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationStop {
    /// The last page had no enabled "next" affordance.
    NoNextPage,
    PageCap,
    /// The page after a "next" click had the same rows as the one before.
    Stuck,
    /// The result table did not reappear after a "next" click.
    ResultsLost,
    Cancelled,
}

/// Rows collected across all pages of one search.
#[derive(Debug, Clone)]
pub struct Harvest {
    pub rows: Vec<RawRow>,
    /// Number of pages parsed.
    pub pages: u32,
    pub stop: PaginationStop,
}

pub struct ResultSetParser {
    columns: ColumnMap,
    rows: Selector,
    header_cells: Selector,
    next_page: Selector,
    table_css: String,
    next_css: String,
}

fn compile(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| GavelError::Config(format!("invalid selector {css:?}: {e}")))
}

/// Non-empty text lines of a cell, inner whitespace collapsed.
fn cell_lines(cell: ElementRef<'_>) -> Vec<String> {
    cell.text()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Direct `<td>` children only; cells on the site may hold nested tables.
fn row_cells(row: ElementRef<'_>) -> Vec<Vec<String>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name().eq_ignore_ascii_case("td"))
        .map(cell_lines)
        .collect()
}

impl ResultSetParser {
    pub fn new(selectors: &ResultSelectors, columns: ColumnMap) -> Result<Self> {
        Ok(Self {
            rows: compile(&selectors.rows)?,
            header_cells: compile(&selectors.header_cells)?,
            next_page: compile(&selectors.next_page)?,
            // Used as WebDriver locators; compiled only to reject bad CSS early.
            table_css: compile(&selectors.table).map(|_| selectors.table.clone())?,
            next_css: selectors.next_page.clone(),
            columns,
        })
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    /// Parse the current page's rows and report whether another page exists.
    ///
    /// Placeholder rows (a single spanning cell, as used for "no results")
    /// are skipped. Fails with [`GavelError::ColumnMapMismatch`] when the
    /// header row or the row width disagrees with the column map.
    pub fn parse_page(&self, markup: &str) -> Result<ParsedPage> {
        let doc = Html::parse_document(markup);
        self.check_headers(&doc)?;

        let table: Vec<Vec<Vec<String>>> = doc
            .select(&self.rows)
            .map(row_cells)
            .filter(|cells| cells.len() > 1)
            .collect();

        let width = self.required_width();
        if !table.is_empty() && table.iter().all(|cells| cells.len() < width) {
            let widest = table.iter().map(Vec::len).max().unwrap_or_default();
            return Err(GavelError::ColumnMapMismatch {
                column: width - 1,
                expected: format!("rows with at least {width} cells"),
                found: Some(format!("widest row has {widest} cells")),
            });
        }

        let rows: Vec<RawRow> = table.iter().map(|cells| self.raw_row(cells)).collect();
        let has_next_page = doc.select(&self.next_page).next().is_some();
        let fingerprint = fingerprint(&rows);
        debug!(
            target: "gavel.parser",
            rows = rows.len(),
            has_next_page,
            "page parsed"
        );

        Ok(ParsedPage {
            rows,
            has_next_page,
            fingerprint,
        })
    }

    /// Parse the current page, then follow "next" until the last page, the
    /// page cap, a repeated page, or cancellation.
    ///
    /// `parse_page` runs at most `page_cap` times.
    pub async fn harvest<P: PageHandle>(
        &self,
        session: &Session<P>,
        recorder: &RecorderHandle,
        page_cap: u32,
        settle_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Harvest> {
        let page_cap = page_cap.max(1);
        let page = session.page();
        let mut rows = Vec::new();
        let mut pages = 0u32;
        let mut previous: Option<String> = None;

        let stop = loop {
            let parsed = self.parse_page(&page.source().await?)?;
            pages += 1;

            if previous.as_deref() == Some(parsed.fingerprint.as_str()) {
                warn!(
                    target: "gavel.parser",
                    page = pages,
                    "page repeated after next click; stopping"
                );
                break PaginationStop::Stuck;
            }

            info!(target: "gavel.parser", page = pages, rows = parsed.rows.len(), "result page read");
            rows.extend(parsed.rows);

            if !parsed.has_next_page {
                break PaginationStop::NoNextPage;
            }
            if pages >= page_cap {
                info!(target: "gavel.parser", page_cap, "page cap reached");
                break PaginationStop::PageCap;
            }
            if cancel.is_cancelled() {
                info!(target: "gavel.parser", page = pages, "pagination cancelled");
                break PaginationStop::Cancelled;
            }
            previous = Some(parsed.fingerprint);

            recorder.drain(page).await;
            if !page.click(&self.next_css).await? {
                debug!(target: "gavel.parser", "next affordance vanished before click");
                break PaginationStop::NoNextPage;
            }
            session.settle(settle_timeout).await?;
            recorder.attach(page).await;
            if !page.wait_for(&self.table_css, settle_timeout).await? {
                warn!(target: "gavel.parser", page = pages + 1, "result table missing after next click");
                break PaginationStop::ResultsLost;
            }
        };

        Ok(Harvest { rows, pages, stop })
    }

    fn check_headers(&self, doc: &Html) -> Result<()> {
        let headers: Vec<String> = doc
            .select(&self.header_cells)
            .map(|th| cell_lines(th).join(" "))
            .collect();
        if headers.is_empty() {
            return Ok(());
        }
        for check in &self.columns.headers {
            let found = headers.get(check.column);
            if !found.is_some_and(|h| h.contains(&check.contains)) {
                return Err(GavelError::ColumnMapMismatch {
                    column: check.column,
                    expected: check.contains.clone(),
                    found: found.cloned(),
                });
            }
        }
        Ok(())
    }

    fn required_width(&self) -> usize {
        self.columns
            .entries()
            .map(|(_, cell)| cell.column)
            .max()
            .unwrap_or_default()
            + 1
    }

    fn raw_row(&self, cells: &[Vec<String>]) -> RawRow {
        let snapshot = cells.iter().map(|lines| lines.join(" ")).collect();
        let mut row = RawRow::new(snapshot);
        for (field, cell) in self.columns.entries() {
            let Some(lines) = cells.get(cell.column) else {
                continue;
            };
            let value = match cell.line {
                Some(n) => lines.get(n).cloned().unwrap_or_default(),
                None => lines.join(" "),
            };
            row.set(field, value);
        }
        row
    }
}

fn fingerprint(rows: &[RawRow]) -> String {
    let mut hasher = blake3::Hasher::new();
    for row in rows {
        hasher.update(row.fingerprint_text().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}
