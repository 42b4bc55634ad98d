//! Run Controller: sequences render, harvest and load for one run.
//!
//! ```text
//! INIT -> RENDERING -> HARVESTING -> LOADING -> DONE
//!   \________\______________\___________\_____-> ABORTED
//! ```
//!
//! The browser session is opened by the controller and closed on every exit
//! path, abort included. Nothing is handed to the loader unless the harvest
//! completed and produced at least one record.

use crate::browser::BrowserSession;
use crate::error::{RunError, ScrapeError};
use crate::models::{Batch, HarvestReport, RunContext};
use crate::scrapers::harvester::{Harvest, PageHarvester};
use crate::utils::truncate_for_log;
use crate::warehouse::{LoadResult, Warehouse, WarehouseLoader};
use itertools::Itertools;
use std::fmt;
use std::process::ExitCode;
use tracing::{error, info, instrument};
use url::Url;

/// Number of records echoed to the log after a successful run.
const SUMMARY_SAMPLE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Rendering,
    Harvesting,
    Loading,
    Done,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "INIT",
            RunState::Rendering => "RENDERING",
            RunState::Harvesting => "HARVESTING",
            RunState::Loading => "LOADING",
            RunState::Done => "DONE",
            RunState::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// What a run ended with. Exactly one of `error` / `load` is set once the run is over.
#[derive(Debug)]
pub struct RunOutcome {
    pub state: RunState,
    pub report: Option<HarvestReport>,
    pub load: Option<LoadResult>,
    pub batch: Option<Batch>,
    pub context: Option<RunContext>,
    pub error: Option<RunError>,
}

impl RunOutcome {
    fn new() -> Self {
        RunOutcome {
            state: RunState::Init,
            report: None,
            load: None,
            batch: None,
            context: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug)]
pub struct RunController<W> {
    harvester: PageHarvester,
    loader: WarehouseLoader<W>,
    target_url: Url,
    state: RunState,
}

impl<W: Warehouse> RunController<W> {
    pub fn new(harvester: PageHarvester, loader: WarehouseLoader<W>, target_url: Url) -> Self {
        RunController {
            harvester,
            loader,
            target_url,
            state: RunState::Init,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn loader(&self) -> &WarehouseLoader<W> {
        &self.loader
    }

    fn transition(&mut self, next: RunState) {
        info!(from = %self.state, to = %next, "Run state transition");
        self.state = next;
    }

    /// Execute one run with a session obtained from `open`.
    #[instrument(level = "info", skip_all, fields(url = %self.target_url, table = %self.loader.table()))]
    pub async fn run<S, F>(&mut self, open: F) -> RunOutcome
    where
        S: BrowserSession,
        F: FnOnce() -> Result<S, ScrapeError>,
    {
        let mut outcome = RunOutcome::new();

        let result = match open() {
            Ok(mut session) => {
                let result = self.execute(&mut session, &mut outcome).await;
                session.close().await;
                result
            }
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                self.transition(RunState::Done);
                log_summary(&outcome);
            }
            Err(e) => {
                self.transition(RunState::Aborted);
                error!(kind = e.kind(), error = %e, "Run aborted");
                outcome.error = Some(e);
            }
        }
        outcome.state = self.state;
        outcome
    }

    async fn execute<S: BrowserSession>(
        &mut self,
        session: &mut S,
        outcome: &mut RunOutcome,
    ) -> Result<(), RunError> {
        self.transition(RunState::Rendering);
        let page = self.harvester.render(session, &self.target_url).await?;

        self.transition(RunState::Harvesting);
        let Harvest {
            batch,
            report,
            context,
        } = self.harvester.harvest(&page)?;
        drop(page);
        outcome.report = Some(report);

        if batch.is_empty() {
            return Err(RunError::NoArticles { seen: report.seen });
        }

        self.transition(RunState::Loading);
        let load = self.loader.load(&batch, &context).await?;

        outcome.load = Some(load);
        outcome.batch = Some(batch);
        outcome.context = Some(context);
        Ok(())
    }
}

fn log_summary(outcome: &RunOutcome) {
    if let (Some(report), Some(load)) = (outcome.report, outcome.load) {
        info!(
            seen = report.seen,
            accepted = report.accepted,
            rejected = report.rejected,
            failed = report.failed,
            rows_written = load.rows_written,
            "Run complete"
        );
    }

    let Some(batch) = &outcome.batch else {
        return;
    };
    for record in batch.records().iter().take(SUMMARY_SAMPLE) {
        info!(
            title = %truncate_for_log(&record.title, 50),
            kicker = %truncate_for_log(&record.kicker, 50),
            words = record.title_word_count,
            chars = record.title_char_count,
            "Sample article"
        );
    }
    if let Some(first) = batch.records().first() {
        info!(capital_words = %first.capital_words.iter().join(", "), "Capital words in first article");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::StaticSession;
    use crate::config::SelectorConfig;
    use crate::error::WarehouseError;
    use crate::retry::Backoff;
    use crate::scrapers::extractor::FieldExtractor;
    use crate::warehouse::{MemoryWarehouse, TableRef, TableSchema};
    use std::time::Duration;

    const LISTING: &str = r#"
        <html><body>
          <div class="contenedor_dato_modulo">
            <div class="volanta">Latin America</div>
            <h2 class="titulo"><a href="/news/1">Brazil Opens Betting Market</a></h2>
            <img src="/img/1.jpg">
          </div>
          <div class="contenedor_dato_modulo">
            <h2 class="titulo"><a>Headline Without Link</a></h2>
          </div>
          <div class="contenedor_dato_modulo">
            <h2 class="titulo"><a href="/news/3">Tribal gaming compact signed</a></h2>
          </div>
        </body></html>"#;

    fn controller() -> RunController<MemoryWarehouse> {
        let selectors = SelectorConfig::default();
        let harvester = PageHarvester::new(
            &selectors.container,
            FieldExtractor::from(&selectors),
            Duration::from_millis(5),
            Backoff::none(),
        );
        let loader = WarehouseLoader::new(
            MemoryWarehouse::new(),
            TableRef {
                project: "local".to_string(),
                dataset: "news".to_string(),
                table: "articles".to_string(),
            },
            TableSchema::articles(),
        );
        RunController::new(
            harvester,
            loader,
            Url::parse("https://www.yogonet.com/international/").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_successful_run_loads_batch() {
        let mut controller = controller();
        let session = StaticSession::new(LISTING);
        let probe = session.probe.clone();

        let outcome = controller.run(|| Ok(session)).await;

        assert_eq!(outcome.state, RunState::Done);
        assert!(outcome.is_success());
        assert_eq!(outcome.exit_code(), ExitCode::SUCCESS);
        assert_eq!(
            outcome.report,
            Some(HarvestReport { seen: 3, accepted: 2, rejected: 1, failed: 0 })
        );
        assert_eq!(outcome.load, Some(LoadResult { rows_written: 2 }));
        assert_eq!(probe.closes.get(), 1);

        let rows = controller.loader().warehouse().rows(controller.loader().table());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values["title"], "Brazil Opens Betting Market");
        assert_eq!(rows[0].values["link"], "https://www.yogonet.com/news/1");
        assert_eq!(rows[0].values["scrape_date"], rows[1].values["scrape_date"]);
    }

    #[tokio::test]
    async fn test_render_timeout_aborts_without_loading() {
        let mut controller = controller();
        let session = StaticSession::new("<html><body><div id='spinner'></div></body></html>");
        let probe = session.probe.clone();

        let outcome = controller.run(|| Ok(session)).await;

        assert_eq!(outcome.state, RunState::Aborted);
        assert_eq!(controller.state(), RunState::Aborted);
        assert_eq!(outcome.exit_code(), ExitCode::FAILURE);
        assert_eq!(outcome.error.as_ref().map(RunError::kind), Some("page_load_timeout"));
        assert!(outcome.report.is_none());
        assert_eq!(controller.loader().warehouse().append_calls(), 0);
        assert_eq!(probe.closes.get(), 1);
    }

    #[tokio::test]
    async fn test_empty_harvest_aborts() {
        let mut controller = controller();
        let session = StaticSession::new(
            r#"<div class="contenedor_dato_modulo"><p>Advertisement</p></div>"#,
        );

        let outcome = controller.run(|| Ok(session)).await;

        assert_eq!(outcome.state, RunState::Aborted);
        assert_eq!(outcome.error.as_ref().map(RunError::kind), Some("no_articles"));
        assert_eq!(outcome.report.map(|r| r.rejected), Some(1));
        assert_eq!(controller.loader().warehouse().append_calls(), 0);
    }

    #[tokio::test]
    async fn test_warehouse_failure_aborts_and_writes_nothing() {
        let mut controller = controller();
        controller
            .loader()
            .warehouse()
            .fail_next_append(WarehouseError::Auth("token expired".to_string()));
        let session = StaticSession::new(LISTING);
        let probe = session.probe.clone();

        let outcome = controller.run(|| Ok(session)).await;

        assert_eq!(outcome.state, RunState::Aborted);
        assert_eq!(outcome.error.as_ref().map(RunError::kind), Some("warehouse_auth"));
        assert!(outcome.load.is_none());
        assert!(controller
            .loader()
            .warehouse()
            .rows(controller.loader().table())
            .is_empty());
        assert_eq!(probe.closes.get(), 1);
    }

    #[tokio::test]
    async fn test_session_open_failure_aborts() {
        let mut controller = controller();
        let outcome = controller
            .run(|| -> Result<StaticSession, ScrapeError> {
                Err(ScrapeError::Navigation {
                    url: String::new(),
                    reason: "no browser".to_string(),
                })
            })
            .await;

        assert_eq!(outcome.state, RunState::Aborted);
        assert_eq!(outcome.error.as_ref().map(RunError::kind), Some("navigation"));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(RunState::Harvesting.to_string(), "HARVESTING");
        assert_eq!(RunState::Aborted.to_string(), "ABORTED");
    }
}
