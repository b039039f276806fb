#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use gavel_common::model::SearchCriteria;
use gavel_common::observability::{LogConfig, LogFormat};
use gavel_common::{GavelError, Result};
use gavel_config::{FormLocators, GavelConfig, ResultSelectors};
use gavel_drivers::gavel_browser::{
    driver::Session,
    page::{PageHandle, SelectOutcome},
    readiness::Readiness,
    recorder::{DRAIN_SCRIPT, HOOK_GLOBAL},
};
use serde_json::{Value, json};

static INIT_PATH: OnceLock<std::path::PathBuf> = OnceLock::new();

pub fn init_test_tracing() {
    let _ = INIT_PATH.get_or_init(|| {
        let config = LogConfig {
            app_name: "gavel-tests",
            log_dir: Some(std::env::temp_dir().join("gavel-tests")),
            emit_stderr: true,
            format: LogFormat::Text,
            default_filter: "debug".into(),
        };
        gavel_common::observability::init_logging(config).unwrap_or_default()
    });
}

pub const COURT: &str = "부산지방법원";

/// One listing row as the site renders it.
#[derive(Debug, Clone)]
pub struct Listing {
    pub case_number: String,
    pub item_number: String,
    pub appraisal: String,
    pub minimum: String,
    pub date: String,
    pub status: String,
}

impl Listing {
    pub fn numbered(n: u32) -> Self {
        Self {
            case_number: format!("2024타경{}", 1000 + n),
            item_number: "1".into(),
            appraisal: "123,456,789원".into(),
            minimum: "86,419,000원".into(),
            date: "2025.01.15".into(),
            status: if n % 2 == 0 { "신건".into() } else { "유찰 1회".into() },
        }
    }

    pub fn with_date(mut self, date: &str) -> Self {
        self.date = date.into();
        self
    }

    fn render(&self) -> String {
        format!(
            r#"<tr>
              <td><input type="checkbox" name="chk"></td>
              <td>{COURT}<br>{case}</td>
              <td>{item}</td>
              <td>부산광역시 해운대구 우동 {case}<br><span>[토지·건물 일괄매각]</span></td>
              <td>아파트</td>
              <td><div>{appraisal}</div><div>{minimum}</div></td>
              <td>경매1계<br>{date}</td>
              <td>{status}</td>
            </tr>"#,
            case = self.case_number,
            item = self.item_number,
            appraisal = self.appraisal,
            minimum = self.minimum,
            date = self.date,
            status = self.status,
        )
    }
}

pub fn listings(range: std::ops::Range<u32>) -> Vec<Listing> {
    range.map(Listing::numbered).collect()
}

pub const HEADER: &str = r#"<thead><tr>
  <th>선택</th><th>사건번호</th><th>물건번호</th><th>소재지 및 내역</th><th>용도</th>
  <th>감정평가액<br>최저매각가격</th><th>담당계<br>매각기일</th><th>진행상태</th>
</tr></thead>"#;

/// A result page in the shape of the default site profile.
pub fn result_page(rows: &[Listing], has_next: bool) -> String {
    result_page_with_header(HEADER, rows, has_next)
}

pub fn result_page_with_header(header: &str, rows: &[Listing], has_next: bool) -> String {
    let body = if rows.is_empty() {
        r#"<tr><td colspan="8">검색결과가 없습니다.</td></tr>"#.to_string()
    } else {
        rows.iter().map(Listing::render).collect()
    };
    let pager = if has_next {
        r##"<div class="page2"><a href="#">1</a><a class="next" href="#">다음</a></div>"##
    } else {
        r##"<div class="page2"><a href="#">1</a></div>"##
    };
    format!(
        r#"<html><body><div id="contents">
        <table class="Ltbl_list">{header}<tbody>{body}</tbody></table>{pager}
        </div></body></html>"#
    )
}

const FORM_PAGE: &str = r#"<html><body><form name="search">
  <select name="jiwonNm"><option>부산지방법원</option></select>
  <input name="termStartDt"><input name="termEndDt">
  <a href="javascript:srchJiwonSearch()">검색</a>
</form></body></html>"#;

/// Counters the test keeps after the page moves into the session.
#[derive(Debug, Default)]
pub struct Tally {
    pub gotos: AtomicUsize,
    pub screenshots: AtomicUsize,
    pub sources: AtomicUsize,
    pub next_clicks: AtomicUsize,
    pub closed: AtomicBool,
    pub filled: Mutex<Vec<(String, String)>>,
}

impl Tally {
    pub fn screenshots(&self) -> usize {
        self.screenshots.load(Ordering::SeqCst)
    }

    pub fn gotos(&self) -> usize {
        self.gotos.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Where the search request lands; the site answers the form POST here.
pub const LIST_URL: &str = "https://www.courtauction.go.kr/RetrieveRealEstMulDetailList.laf";

/// State of the currently loaded document.
#[derive(Debug, Default)]
struct Cursor {
    submitted: bool,
    page: usize,
    /// The capture hook has been installed in this document.
    hooked: bool,
    /// Timing entries the browser holds for this document's load.
    timing_entries: Vec<Value>,
    /// Exchanges buffered by the hook since the last drain.
    pending_exchanges: Vec<Value>,
}

impl Cursor {
    fn loaded(timing_entries: Vec<Value>) -> Self {
        Self {
            timing_entries,
            ..Self::default()
        }
    }
}

/// Scripted stand-in for the listing site.
pub struct FakePage {
    tally: Arc<Tally>,
    courts: Vec<String>,
    missing: HashSet<String>,
    pages: Vec<String>,
    results_render: bool,
    stuck: bool,
    goto_timeouts: AtomicUsize,
    load_requests: Vec<String>,
    cursor: Mutex<Cursor>,
    form: FormLocators,
    results: ResultSelectors,
}

impl FakePage {
    pub fn new(pages: Vec<String>) -> Self {
        Self {
            tally: Arc::new(Tally::default()),
            courts: vec![COURT.to_string()],
            missing: HashSet::new(),
            pages,
            results_render: true,
            stuck: false,
            goto_timeouts: AtomicUsize::new(0),
            load_requests: Vec::new(),
            cursor: Mutex::new(Cursor::default()),
            form: FormLocators::default(),
            results: ResultSelectors::default(),
        }
    }

    pub fn tally(&self) -> Arc<Tally> {
        Arc::clone(&self.tally)
    }

    /// Remove a control from the search form.
    pub fn without(mut self, css: &str) -> Self {
        self.missing.insert(css.to_string());
        self
    }

    pub fn with_courts(mut self, courts: &[&str]) -> Self {
        self.courts = courts.iter().map(|c| c.to_string()).collect();
        self
    }

    /// The result table never appears after submit.
    pub fn without_results(mut self) -> Self {
        self.results_render = false;
        self
    }

    /// "Next" clicks leave the same page in place.
    pub fn stuck(mut self) -> Self {
        self.stuck = true;
        self
    }

    /// The first `n` navigations time out.
    pub fn timing_out(self, n: usize) -> Self {
        self.goto_timeouts.store(n, Ordering::SeqCst);
        self
    }

    /// The search page issues an XHR to `url` while it loads.
    pub fn with_load_request(mut self, url: &str) -> Self {
        self.load_requests.push(url.to_string());
        self
    }

    pub fn into_session(self) -> (Session<Self>, Arc<Tally>) {
        let tally = self.tally();
        (Session::from_page(self, Duration::from_secs(2)), tally)
    }
}

#[async_trait]
impl PageHandle for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        self.tally.gotos.fetch_add(1, Ordering::SeqCst);
        let remaining = self.goto_timeouts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.goto_timeouts.store(remaining - 1, Ordering::SeqCst);
            return Err(GavelError::NavigationTimeout {
                url: url.to_string(),
                timeout_secs: 0,
            });
        }
        let mut entries = vec![json!({
            "kind": "navigation",
            "url": url,
            "method": "GET",
            "status": 200,
            "timestamp_ms": 1_736_000_000_000i64,
        })];
        entries.extend(self.load_requests.iter().map(|url| {
            json!({ "kind": "resource", "url": url, "status": 200, "timestamp_ms": 1_736_000_000_100i64 })
        }));
        *self.cursor.lock().unwrap() = Cursor::loaded(entries);
        Ok(())
    }

    async fn wait_ready(&self, _timeout: Duration) -> Result<Readiness> {
        Ok(Readiness::settled(5))
    }

    async fn wait_for(&self, css: &str, _timeout: Duration) -> Result<bool> {
        if css == self.results.table {
            let submitted = self.cursor.lock().unwrap().submitted;
            return Ok(submitted && self.results_render && !self.pages.is_empty());
        }
        Ok(!self.missing.contains(css))
    }

    async fn source(&self) -> Result<String> {
        self.tally.sources.fetch_add(1, Ordering::SeqCst);
        let cursor = self.cursor.lock().unwrap();
        if !cursor.submitted || self.pages.is_empty() {
            return Ok(FORM_PAGE.to_string());
        }
        Ok(self.pages[cursor.page.min(self.pages.len() - 1)].clone())
    }

    async fn select_by_label(&self, css: &str, label: &str) -> Result<SelectOutcome> {
        if self.missing.contains(css) {
            return Ok(SelectOutcome::ControlMissing);
        }
        if self.courts.iter().any(|c| c == label) {
            Ok(SelectOutcome::Selected)
        } else {
            Ok(SelectOutcome::OptionMissing)
        }
    }

    async fn fill(&self, css: &str, value: &str) -> Result<bool> {
        if self.missing.contains(css) {
            return Ok(false);
        }
        self.tally
            .filled
            .lock()
            .unwrap()
            .push((css.to_string(), value.to_string()));
        Ok(true)
    }

    async fn click(&self, css: &str) -> Result<bool> {
        if self.missing.contains(css) {
            return Ok(false);
        }
        let mut cursor = self.cursor.lock().unwrap();
        if css == self.form.submit {
            // The form POST replaces the document and any hook installed in it.
            *cursor = Cursor::loaded(vec![json!({
                "kind": "navigation",
                "url": LIST_URL,
                "method": "POST",
                "request_body": format!("jiwonNm={COURT}"),
                "response_body": "<table class=\"Ltbl_list\"></table>",
                "status": 200,
                "timestamp_ms": 1_736_000_001_000i64,
            })]);
            cursor.submitted = true;
        } else if css == self.results.next_page {
            self.tally.next_clicks.fetch_add(1, Ordering::SeqCst);
            if !self.stuck {
                cursor.page += 1;
            }
        }
        Ok(true)
    }

    async fn execute(&self, script: &str) -> Result<Value> {
        let mut cursor = self.cursor.lock().unwrap();
        if script == DRAIN_SCRIPT {
            if !cursor.hooked {
                return Ok(Value::Array(Vec::new()));
            }
            return Ok(Value::Array(std::mem::take(&mut cursor.pending_exchanges)));
        }
        if script.contains(HOOK_GLOBAL) {
            if cursor.hooked {
                return Ok(Value::Bool(false));
            }
            cursor.hooked = true;
            let replayed = std::mem::take(&mut cursor.timing_entries);
            cursor.pending_exchanges.extend(replayed);
        }
        Ok(Value::Bool(true))
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.tally.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(b"\x89PNG\r\n\x1a\n".to_vec())
    }

    async fn close(&self) -> Result<()> {
        self.tally.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn criteria() -> SearchCriteria {
    SearchCriteria::new(
        COURT,
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
    )
    .unwrap()
}

/// Default configuration with diagnostics under `dir` and no background polling.
pub fn test_config(dir: &Path) -> GavelConfig {
    let mut config = GavelConfig::default();
    config.diagnostics.dir = dir.join("diagnostics");
    config.capture.poll_interval_ms = 0;
    config.run.results_timeout_secs = 1;
    config.run.retry_backoff_ms = 1;
    config
}
