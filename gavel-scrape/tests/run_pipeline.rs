mod common;

use common::*;
use chrono::NaiveDate;
use gavel_common::GavelError;
use gavel_common::model::{AuctionStatus, FailureTag, Field};
use gavel_config::FormLocators;
use gavel_scrape::diagnostic::{CONTEXT_FILE, NETWORK_LOG_FILE, SCREENSHOT_FILE};
use gavel_scrape::{PaginationStop, RunOutcome, RunState, Scraper};
use tokio_util::sync::CancellationToken;

fn scraper(dir: &std::path::Path) -> Scraper {
    Scraper::new(test_config(dir)).unwrap()
}

#[tokio::test]
async fn two_pages_yield_every_listing() {
    init_test_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let page = FakePage::new(vec![
        result_page(&listings(0..8), true),
        result_page(&listings(8..13), false),
    ]);
    let (session, tally) = page.into_session();

    let out = scraper(tmp.path())
        .run_with_session(session, criteria(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out.outcome, RunOutcome::Completed);
    assert_eq!(out.criteria.from(), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    assert_eq!(out.criteria.to(), NaiveDate::from_ymd_opt(2025, 1, 31).unwrap());
    assert_eq!(out.records.len(), 13);
    assert!(out.failures.is_empty(), "{:?}", out.failures);
    assert_eq!(out.pages, 2);
    assert_eq!(out.pagination, Some(PaginationStop::NoNextPage));
    assert!(out.diagnostics.is_none());
    assert_eq!(tally.screenshots(), 0);
    assert!(tally.is_closed());
    assert_eq!(out.states.last(), Some(&RunState::Done));

    let first = &out.records[0];
    assert_eq!(first.case_number, "2024타경1000");
    assert_eq!(first.appraisal_value, Some(123_456_789));
    assert_eq!(first.minimum_sale_price, Some(86_419_000));
    assert_eq!(first.status, AuctionStatus::Scheduled);
    assert_eq!(out.records[1].status, AuctionStatus::Failed);
    assert_eq!(out.records[1].failure_count, 1);
}

#[tokio::test]
async fn search_fills_dates_in_site_format() {
    let tmp = tempfile::tempdir().unwrap();
    let (session, tally) = FakePage::new(vec![result_page(&listings(0..1), false)]).into_session();

    scraper(tmp.path())
        .run_with_session(session, criteria(), CancellationToken::new())
        .await
        .unwrap();

    let form = FormLocators::default();
    let filled = tally.filled.lock().unwrap().clone();
    assert_eq!(
        filled,
        vec![
            (form.date_from, "2025.01.01".to_string()),
            (form.date_to, "2025.01.31".to_string()),
        ]
    );
}

#[tokio::test]
async fn missing_submit_is_structural_with_diagnostics() {
    init_test_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let submit = FormLocators::default().submit;
    let (session, tally) = FakePage::new(vec![result_page(&listings(0..3), false)])
        .without(&submit)
        .into_session();

    let out = scraper(tmp.path())
        .run_with_session(session, criteria(), CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(out.outcome, RunOutcome::Structural { .. }));
    assert!(out.records.is_empty());
    assert!(out.states.contains(&RunState::SearchFailed));
    assert_eq!(tally.screenshots(), 1);
    assert!(tally.is_closed());

    let report = out.diagnostics.unwrap();
    assert_eq!(report.dir, tmp.path().join("diagnostics").join(out.run_id.to_string()));
    for file in [SCREENSHOT_FILE, NETWORK_LOG_FILE, CONTEXT_FILE] {
        assert!(report.dir.join(file).exists(), "{file} missing");
    }
    let context: serde_json::Value =
        serde_json::from_slice(&std::fs::read(report.dir.join(CONTEXT_FILE)).unwrap()).unwrap();
    assert_eq!(context["trigger"]["class"], "structural");
    assert_eq!(context["state"], "search_failed");
}

#[tokio::test]
async fn unknown_court_is_structural() {
    let tmp = tempfile::tempdir().unwrap();
    let (session, tally) = FakePage::new(vec![result_page(&listings(0..3), false)])
        .with_courts(&["서울중앙지방법원"])
        .into_session();

    let out = scraper(tmp.path())
        .run_with_session(session, criteria(), CancellationToken::new())
        .await
        .unwrap();

    match &out.outcome {
        RunOutcome::Structural { error } => assert!(error.contains("court not found"), "{error}"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(tally.screenshots(), 1);
}

#[tokio::test]
async fn zero_rows_capture_diagnostics_once() {
    let tmp = tempfile::tempdir().unwrap();
    let (session, tally) = FakePage::new(vec![result_page(&[], false)]).into_session();

    let out = scraper(tmp.path())
        .run_with_session(session, criteria(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out.outcome, RunOutcome::Empty);
    assert!(out.records.is_empty());
    assert_eq!(out.pages, 1);
    assert_eq!(tally.screenshots(), 1);
    let report = out.diagnostics.unwrap();
    assert!(report.screenshot.unwrap().exists());
    assert_eq!(
        out.states.iter().filter(|s| **s == RunState::DiagnosticCapture).count(),
        1
    );
}

#[tokio::test]
async fn missing_result_table_is_an_empty_result() {
    let tmp = tempfile::tempdir().unwrap();
    let (session, tally) = FakePage::new(vec![result_page(&listings(0..3), false)])
        .without_results()
        .into_session();

    let out = scraper(tmp.path())
        .run_with_session(session, criteria(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out.outcome, RunOutcome::Empty);
    assert_eq!(out.pages, 0);
    assert!(out.states.contains(&RunState::EmptyResult));
    assert_eq!(tally.screenshots(), 1);
}

#[tokio::test]
async fn page_cap_bounds_parsing() {
    let tmp = tempfile::tempdir().unwrap();
    let pages = (0..5)
        .map(|p| result_page(&listings(p * 10..p * 10 + 4), true))
        .collect();
    let (session, tally) = FakePage::new(pages).into_session();

    let out = scraper(tmp.path())
        .run_with_session(session, criteria().with_page_cap(2), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out.pages, 2);
    assert_eq!(out.pagination, Some(PaginationStop::PageCap));
    assert_eq!(out.records.len(), 8);
    assert_eq!(tally.next_clicks.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_page_stops_pagination() {
    let tmp = tempfile::tempdir().unwrap();
    let (session, tally) = FakePage::new(vec![
        result_page(&listings(0..4), true),
        result_page(&listings(4..8), false),
    ])
    .stuck()
    .into_session();

    let out = scraper(tmp.path())
        .run_with_session(session, criteria(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out.pagination, Some(PaginationStop::Stuck));
    assert_eq!(out.pages, 2);
    assert_eq!(out.records.len(), 4);
    assert_eq!(out.duplicates, 0);
    assert_eq!(tally.next_clicks.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_stops_after_current_page() {
    let tmp = tempfile::tempdir().unwrap();
    let (session, tally) = FakePage::new(vec![
        result_page(&listings(0..4), true),
        result_page(&listings(4..8), false),
    ])
    .into_session();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let out = scraper(tmp.path())
        .run_with_session(session, criteria(), cancel)
        .await
        .unwrap();

    assert_eq!(out.pagination, Some(PaginationStop::Cancelled));
    assert_eq!(out.records.len(), 4);
    assert!(tally.is_closed());
}

#[tokio::test]
async fn listings_repeated_across_pages_are_deduplicated() {
    let tmp = tempfile::tempdir().unwrap();
    let (session, _tally) = FakePage::new(vec![
        result_page(&listings(0..3), true),
        result_page(&listings(2..5), false),
    ])
    .into_session();

    let out = scraper(tmp.path())
        .run_with_session(session, criteria(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out.records.len(), 5);
    assert_eq!(out.duplicates, 1);
}

#[tokio::test]
async fn malformed_cell_keeps_row_and_tags_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let rows = vec![Listing::numbered(0), Listing::numbered(1).with_date("미정")];
    let (session, _tally) = FakePage::new(vec![result_page(&rows, false)]).into_session();

    let out = scraper(tmp.path())
        .run_with_session(session, criteria(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out.records.len(), 2);
    assert_eq!(out.records[1].auction_date, None);
    assert_eq!(out.failures.len(), 1);
    assert_eq!(out.failures[0].field, Field::AuctionDate);
    assert_eq!(out.failures[0].tag, FailureTag::Date);
    assert!(out.failures[0].row.iter().any(|cell| cell.contains("2024타경1001")));
}

#[tokio::test]
async fn header_drift_is_structural() {
    let tmp = tempfile::tempdir().unwrap();
    let drifted = HEADER.replace("사건번호", "사건");
    let (session, tally) =
        FakePage::new(vec![result_page_with_header(&drifted, &listings(0..3), false)]).into_session();

    let out = scraper(tmp.path())
        .run_with_session(session, criteria(), CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(out.outcome, RunOutcome::Structural { .. }));
    assert!(out.records.is_empty());
    assert!(out.states.contains(&RunState::Paginating));
    assert_eq!(tally.screenshots(), 1);
}

#[tokio::test]
async fn navigation_timeout_is_retried_once() {
    let tmp = tempfile::tempdir().unwrap();
    let (session, tally) = FakePage::new(vec![result_page(&listings(0..2), false)])
        .timing_out(1)
        .into_session();

    let out = scraper(tmp.path())
        .run_with_session(session, criteria(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out.records.len(), 2);
    assert_eq!(tally.gotos(), 2);
}

#[tokio::test]
async fn second_navigation_timeout_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let (session, tally) = FakePage::new(vec![result_page(&listings(0..2), false)])
        .timing_out(2)
        .into_session();

    let err = scraper(tmp.path())
        .run_with_session(session, criteria(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, GavelError::NavigationTimeout { timeout_secs: 2, .. }));
    assert_eq!(tally.gotos(), 2);
    assert_eq!(tally.screenshots(), 1);
    assert!(tally.is_closed());
    let bundles: Vec<_> = std::fs::read_dir(tmp.path().join("diagnostics")).unwrap().collect();
    assert_eq!(bundles.len(), 1);
}

#[tokio::test]
async fn search_traffic_is_recorded_and_flushed() {
    let tmp = tempfile::tempdir().unwrap();
    let output = tmp.path().join("capture").join("network.json");
    let mut config = test_config(tmp.path());
    config.capture.output = Some(output.clone());
    config.capture.poll_interval_ms = 5;
    let (session, _tally) = FakePage::new(vec![result_page(&listings(0..2), false)]).into_session();

    let out = Scraper::new(config)
        .unwrap()
        .run_with_session(session, criteria(), CancellationToken::new())
        .await
        .unwrap();

    // The search page load, then the form POST that replaced it.
    assert_eq!(out.captured_requests, 2);
    assert_eq!(out.dropped_requests, 0);
    let log: Vec<serde_json::Value> =
        serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0]["method"], "GET");
    assert_eq!(log[1]["kind"], "navigation");
    assert_eq!(log[1]["method"], "POST");
    assert_eq!(log[1]["url"], LIST_URL);
    assert_eq!(log[1]["pattern"], "list");
    assert!(log[1]["request_body"].as_str().unwrap().contains("jiwonNm="));
}

#[tokio::test]
async fn traffic_finished_before_the_hook_is_recorded() {
    let tmp = tempfile::tempdir().unwrap();
    let output = tmp.path().join("network.json");
    let mut config = test_config(tmp.path());
    config.capture.output = Some(output.clone());
    let (session, _tally) = FakePage::new(vec![result_page(&listings(0..1), false)])
        .with_load_request("https://www.courtauction.go.kr/api/courtCodes")
        .into_session();

    let out = Scraper::new(config)
        .unwrap()
        .run_with_session(session, criteria(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out.captured_requests, 3);
    let log: Vec<serde_json::Value> =
        serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap();
    let early = log
        .iter()
        .find(|e| e["kind"] == "resource")
        .expect("load-time request recorded");
    assert_eq!(early["pattern"], "api");
    assert!(early["url"].as_str().unwrap().ends_with("/api/courtCodes"));
}

#[tokio::test]
async fn each_run_starts_with_an_empty_capture_log() {
    let tmp = tempfile::tempdir().unwrap();
    let scraper = scraper(tmp.path());

    let mut counts = Vec::new();
    for _ in 0..2 {
        let (session, _tally) =
            FakePage::new(vec![result_page(&listings(0..1), false)]).into_session();
        let out = scraper
            .run_with_session(session, criteria(), CancellationToken::new())
            .await
            .unwrap();
        counts.push(out.captured_requests);
    }

    assert_eq!(counts, vec![2, 2]);
}

#[tokio::test]
async fn disabled_diagnostics_still_finish_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.diagnostics.enabled = false;
    let (session, tally) = FakePage::new(vec![result_page(&[], false)]).into_session();

    let out = Scraper::new(config)
        .unwrap()
        .run_with_session(session, criteria(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out.outcome, RunOutcome::Empty);
    assert!(out.diagnostics.is_none());
    assert_eq!(tally.screenshots(), 0);
    assert!(!tmp.path().join("diagnostics").exists());
}
