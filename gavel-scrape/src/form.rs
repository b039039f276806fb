use std::time::Duration;

use gavel_common::model::{SITE_DATE_FORMAT, SearchCriteria};
use gavel_common::{GavelError, Result};
use gavel_config::FormLocators;
use gavel_drivers::gavel_browser::{
    driver::Session,
    page::{PageHandle, SelectOutcome},
};
use tracing::{debug, info};

/// What the results area showed after the search was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    ResultsReady,
    /// The table never rendered within the results timeout.
    Empty,
}

/// Fills and submits the court/date search form.
pub struct SearchFormNavigator {
    form: FormLocators,
    results_table: String,
    results_timeout: Duration,
}

impl SearchFormNavigator {
    pub fn new(form: FormLocators, results_table: impl Into<String>, results_timeout: Duration) -> Self {
        Self {
            form,
            results_table: results_table.into(),
            results_timeout,
        }
    }

    /// Select the court, fill the date range, submit, and wait for results.
    ///
    /// A missing court option is [`GavelError::CourtNotFound`]; a missing
    /// date input or submit control is [`GavelError::SearchControlNotFound`].
    /// Both are structural.
    pub async fn submit<P: PageHandle>(
        &self,
        session: &Session<P>,
        criteria: &SearchCriteria,
    ) -> Result<SearchOutcome> {
        let page = session.page();

        match page.select_by_label(&self.form.court_select, criteria.court()).await? {
            SelectOutcome::Selected => {}
            SelectOutcome::ControlMissing => {
                return Err(GavelError::CourtNotFound(format!(
                    "court selector {} is missing",
                    self.form.court_select
                )));
            }
            SelectOutcome::OptionMissing => {
                return Err(GavelError::CourtNotFound(format!(
                    "no option labelled {:?} in {}",
                    criteria.court(),
                    self.form.court_select
                )));
            }
        }

        for (css, date) in [
            (&self.form.date_from, criteria.from()),
            (&self.form.date_to, criteria.to()),
        ] {
            let value = date.format(SITE_DATE_FORMAT).to_string();
            if !page.fill(css, &value).await? {
                return Err(GavelError::SearchControlNotFound(css.clone()));
            }
            debug!(target: "gavel.form", input = %css, %value, "date filled");
        }

        if !page.click(&self.form.submit).await? {
            return Err(GavelError::SearchControlNotFound(self.form.submit.clone()));
        }
        info!(
            target: "gavel.form",
            court = criteria.court(),
            from = %criteria.from(),
            to = %criteria.to(),
            "search submitted"
        );

        session.settle(self.results_timeout).await?;
        if page.wait_for(&self.results_table, self.results_timeout).await? {
            Ok(SearchOutcome::ResultsReady)
        } else {
            info!(
                target: "gavel.form",
                timeout_secs = self.results_timeout.as_secs(),
                "result table did not render"
            );
            Ok(SearchOutcome::Empty)
        }
    }
}
