//! One scraping run, end to end.
//!
//! ```text
//! Idle → SessionOpen → Searching → {ResultsReady | EmptyResult | SearchFailed}
//!      → Paginating → Normalizing → [DiagnosticCapture] → Done
//! any non-terminal state → DiagnosticCapture → Failed   (fatal error)
//! ```
//!
//! Structural errors (court missing, form controls missing, column map
//! drift) end in `Done` with zero records and a diagnostic bundle. Fatal
//! errors capture diagnostics and are returned to the caller.
use gavel_common::model::{ParseFailure, PropertyRecord, SearchCriteria};
use gavel_common::{GavelError, Result};
use gavel_config::GavelConfig;
use gavel_drivers::gavel_browser::{
    driver::Session,
    page::{GavelPage, PageHandle},
    recorder::{NetworkRecorder, RecorderHandle},
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::diagnostic::{self, DiagnosticReport, DiagnosticTrigger};
use crate::form::{SearchFormNavigator, SearchOutcome};
use crate::normalize::FieldNormalizer;
use crate::parser::{Harvest, PaginationStop, ResultSetParser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    SessionOpen,
    Searching,
    ResultsReady,
    EmptyResult,
    SearchFailed,
    Paginating,
    Normalizing,
    DiagnosticCapture,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn allows(self, next: RunState) -> bool {
        use RunState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, DiagnosticCapture | Failed) => self != DiagnosticCapture || next == Failed,
            (Idle, SessionOpen) => true,
            (SessionOpen, Searching) => true,
            (Searching, ResultsReady | EmptyResult | SearchFailed) => true,
            (ResultsReady, Paginating) => true,
            (EmptyResult | Paginating, Normalizing) => true,
            (Normalizing | DiagnosticCapture | SearchFailed, Done) => true,
            _ => false,
        }
    }
}

/// Ordered record of the states a run went through.
#[derive(Debug)]
struct StateTrail {
    run_id: Uuid,
    states: Vec<RunState>,
}

impl StateTrail {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            states: vec![RunState::Idle],
        }
    }

    fn current(&self) -> RunState {
        self.states.last().copied().unwrap_or(RunState::Idle)
    }

    fn advance(&mut self, next: RunState) {
        let from = self.current();
        if !from.allows(next) {
            warn!(target: "gavel.run", run_id = %self.run_id, ?from, to = ?next, "unexpected state transition");
        }
        info!(target: "gavel.run", run_id = %self.run_id, ?from, to = ?next, "state");
        self.states.push(next);
    }
}

/// How a run ended, short of a fatal error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// The search returned no listings.
    Empty,
    /// The page no longer matched the site declaration.
    Structural { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub run_id: Uuid,
    pub criteria: SearchCriteria,
    pub outcome: RunOutcome,
    pub records: Vec<PropertyRecord>,
    pub failures: Vec<ParseFailure>,
    /// Pages parsed; zero when the search never reached results.
    pub pages: u32,
    pub pagination: Option<PaginationStop>,
    pub duplicates: usize,
    pub captured_requests: usize,
    pub dropped_requests: usize,
    pub diagnostics: Option<DiagnosticReport>,
    pub states: Vec<RunState>,
}

/// Runs searches against the listing site.
pub struct Scraper {
    config: GavelConfig,
    navigator: SearchFormNavigator,
    parser: ResultSetParser,
    normalizer: FieldNormalizer,
    diagnostics: diagnostic::DiagnosticCapture,
    /// Empty recorder with compiled patterns; each run starts from a clone.
    recorder: NetworkRecorder,
}

impl Scraper {
    /// Build a scraper, rejecting invalid selectors or capture patterns.
    pub fn new(config: GavelConfig) -> Result<Self> {
        let recorder = NetworkRecorder::from_settings(&config.capture)?;
        let parser = ResultSetParser::new(&config.site.results, config.site.columns.clone())?;
        let navigator = SearchFormNavigator::new(
            config.site.form.clone(),
            config.site.results.table.clone(),
            config.run.results_timeout(),
        );
        let diagnostics = diagnostic::DiagnosticCapture::from_settings(&config.diagnostics);
        Ok(Self {
            config,
            navigator,
            parser,
            normalizer: FieldNormalizer::new(),
            diagnostics,
            recorder,
        })
    }

    pub fn config(&self) -> &GavelConfig {
        &self.config
    }

    /// Open a browser session and run one search in it.
    pub async fn run(&self, criteria: SearchCriteria, cancel: CancellationToken) -> Result<RunOutput> {
        let run_id = Uuid::new_v4();
        let session = match Session::<GavelPage>::open(&self.config.browser).await {
            Ok(session) => session,
            Err(e) => {
                error!(target: "gavel.run", %run_id, error = %e, "could not open browser session");
                let recorder = RecorderHandle::new(NetworkRecorder::disabled());
                let trigger = trigger_for(&e);
                self.diagnostics
                    .capture(run_id, None, &recorder, &trigger, RunState::Idle, &criteria)
                    .await;
                return Err(e);
            }
        };
        self.execute(run_id, session, criteria, cancel).await
    }

    /// Run one search in an already opened session. The session is closed
    /// before this returns, whatever the outcome.
    pub async fn run_with_session<P: PageHandle + 'static>(
        &self,
        session: Session<P>,
        criteria: SearchCriteria,
        cancel: CancellationToken,
    ) -> Result<RunOutput> {
        self.execute(Uuid::new_v4(), session, criteria, cancel).await
    }

    async fn execute<P: PageHandle + 'static>(
        &self,
        run_id: Uuid,
        session: Session<P>,
        criteria: SearchCriteria,
        cancel: CancellationToken,
    ) -> Result<RunOutput> {
        info!(
            target: "gavel.run",
            %run_id,
            court = criteria.court(),
            from = %criteria.from(),
            to = %criteria.to(),
            "run started"
        );
        let recorder = RecorderHandle::new(self.recorder.clone());
        let mut trail = StateTrail::new(run_id);
        trail.advance(RunState::SessionOpen);

        let criteria = &criteria;
        let recorder_ref = &recorder;
        let trail_ref = &mut trail;

        let output = session
            .scoped(|session| async move {
                let stop_polling = cancel.child_token();
                let poller = self.config.capture.poll_interval().map(|interval| {
                    recorder_ref.spawn_poller(session.shared_page(), interval, stop_polling.clone())
                });

                let harvested = self
                    .search_and_harvest(&session, criteria, recorder_ref, &cancel, trail_ref)
                    .await;

                stop_polling.cancel();
                if let Some(poller) = poller {
                    if let Err(e) = poller.await {
                        warn!(target: "gavel.capture", error = %e, "recorder poller panicked");
                    }
                }

                self.finish(run_id, &session, criteria, recorder_ref, trail_ref, harvested)
                    .await
            })
            .await;

        if let Some(path) = &self.config.capture.output {
            if let Err(e) = recorder.flush_to(path).await {
                warn!(target: "gavel.capture", path = %path.display(), error = %e, "network log not written");
            }
        }

        let mut output = output?;
        output.states = trail.states;
        info!(
            target: "gavel.run",
            %run_id,
            records = output.records.len(),
            failures = output.failures.len(),
            pages = output.pages,
            outcome = ?output.outcome,
            "run finished"
        );
        Ok(output)
    }

    async fn search_and_harvest<P: PageHandle>(
        &self,
        session: &Session<P>,
        criteria: &SearchCriteria,
        recorder: &RecorderHandle,
        cancel: &CancellationToken,
        trail: &mut StateTrail,
    ) -> Result<Option<Harvest>> {
        self.open_search_page(session).await?;
        let page = session.page();
        recorder.attach(page).await;

        trail.advance(RunState::Searching);
        recorder.drain(page).await;
        let outcome = match self.navigator.submit(session, criteria).await {
            Ok(outcome) => outcome,
            Err(e) => {
                trail.advance(RunState::SearchFailed);
                return Err(e);
            }
        };
        recorder.attach(page).await;

        match outcome {
            SearchOutcome::Empty => {
                trail.advance(RunState::EmptyResult);
                Ok(None)
            }
            SearchOutcome::ResultsReady => {
                trail.advance(RunState::ResultsReady);
                trail.advance(RunState::Paginating);
                let page_cap = criteria.effective_page_cap(self.config.run.default_page_cap);
                self.parser
                    .harvest(session, recorder, page_cap, self.config.run.results_timeout(), cancel)
                    .await
                    .map(Some)
            }
        }
    }

    /// Navigate to the search page, retrying once after a timeout.
    async fn open_search_page<P: PageHandle>(&self, session: &Session<P>) -> Result<()> {
        let url = &self.config.site.search_url;
        match session.navigate(url).await {
            Ok(_) => Ok(()),
            Err(GavelError::NavigationTimeout { .. }) => {
                let backoff = self.config.run.retry_backoff();
                warn!(
                    target: "gavel.run",
                    %url,
                    backoff_ms = backoff.as_millis() as u64,
                    "search page timed out; retrying once"
                );
                tokio::time::sleep(backoff).await;
                session.navigate(url).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    async fn finish<P: PageHandle + 'static>(
        &self,
        run_id: Uuid,
        session: &Session<P>,
        criteria: &SearchCriteria,
        recorder: &RecorderHandle,
        trail: &mut StateTrail,
        harvested: Result<Option<Harvest>>,
    ) -> Result<RunOutput> {
        let page: &dyn PageHandle = session.page();
        recorder.drain(page).await;
        let mut output = RunOutput {
            run_id,
            criteria: criteria.clone(),
            outcome: RunOutcome::Completed,
            records: Vec::new(),
            failures: Vec::new(),
            pages: 0,
            pagination: None,
            duplicates: 0,
            captured_requests: 0,
            dropped_requests: 0,
            diagnostics: None,
            states: Vec::new(),
        };

        match harvested {
            Ok(harvest) => {
                trail.advance(RunState::Normalizing);
                let rows = match harvest {
                    Some(h) => {
                        output.pages = h.pages;
                        output.pagination = Some(h.stop);
                        h.rows
                    }
                    None => Vec::new(),
                };
                let batch = self.normalizer.normalize_all(&rows);
                if !batch.failures.is_empty() {
                    warn!(
                        target: "gavel.normalize",
                        %run_id,
                        failures = batch.failures.len(),
                        "some fields could not be normalized"
                    );
                }
                output.records = batch.records;
                output.failures = batch.failures;
                output.duplicates = batch.duplicates;

                if output.records.is_empty() {
                    output.outcome = RunOutcome::Empty;
                    let state = trail.current();
                    trail.advance(RunState::DiagnosticCapture);
                    output.diagnostics = self
                        .diagnostics
                        .capture(run_id, Some(page), recorder, &DiagnosticTrigger::ZeroRecords, state, criteria)
                        .await;
                }
                trail.advance(RunState::Done);
            }
            Err(e) if e.is_structural() => {
                warn!(target: "gavel.run", %run_id, error = %e, "page structure changed; no records");
                output.outcome = RunOutcome::Structural {
                    error: e.to_string(),
                };
                let state = trail.current();
                trail.advance(RunState::DiagnosticCapture);
                output.diagnostics = self
                    .diagnostics
                    .capture(run_id, Some(page), recorder, &trigger_for(&e), state, criteria)
                    .await;
                trail.advance(RunState::Done);
            }
            Err(e) => {
                error!(target: "gavel.run", %run_id, error = %e, "run failed");
                let state = trail.current();
                trail.advance(RunState::DiagnosticCapture);
                self.diagnostics
                    .capture(run_id, Some(page), recorder, &trigger_for(&e), state, criteria)
                    .await;
                trail.advance(RunState::Failed);
                return Err(e);
            }
        }

        (output.captured_requests, output.dropped_requests) = recorder.counts().await;
        Ok(output)
    }
}

fn trigger_for(e: &GavelError) -> DiagnosticTrigger {
    DiagnosticTrigger::Error {
        class: e.class(),
        message: e.to_string(),
    }
}
