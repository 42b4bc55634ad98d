//! # News Warehouse
//!
//! Harvests the article blocks of one news listing page, derives title
//! metrics for each article, and appends the batch to a columnar warehouse
//! table in a single all-or-nothing load.
//!
//! ## Usage
//!
//! ```sh
//! news_warehouse -c scraper.yaml -j ./output
//! news_warehouse --dry-run
//! ```
//!
//! ## Architecture
//!
//! One run walks a fixed sequence:
//! 1. **Rendering**: navigate to the listing page and wait for the article container
//! 2. **Harvesting**: extract the fields of every block, drop blocks without title or link
//! 3. **Loading**: validate every row against the table schema, then append once
//! 4. **Output**: optionally write a JSON snapshot of the loaded batch
//!
//! Any fatal error aborts the run with a non-zero exit status and nothing loaded.

use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod browser;
mod cli;
mod config;
mod error;
mod metrics;
mod models;
mod outputs;
mod retry;
mod run;
mod scrapers;
mod utils;
mod warehouse;

use browser::HttpSession;
use cli::Cli;
use config::{Destination, Settings};
use error::RunError;
use outputs::json::{write_snapshot, RunSnapshot};
use retry::Backoff;
use run::{RunController, RunOutcome};
use scrapers::extractor::FieldExtractor;
use scrapers::harvester::PageHarvester;
use utils::ensure_writable_dir;
use warehouse::{BigQueryWarehouse, MemoryWarehouse, TableSchema, Warehouse, WarehouseLoader};

/// Attempts for each warehouse request before connectivity errors become fatal.
const WAREHOUSE_ATTEMPTS: usize = 3;

#[tokio::main]
#[instrument]
async fn main() -> ExitCode {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("news_warehouse starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let settings = match Settings::resolve(&args) {
        Ok(settings) => settings,
        Err(e) => return abort(e.into()),
    };
    info!(
        url = %settings.target_url,
        table = %settings.destination.table(),
        dry_run = matches!(settings.destination, Destination::DryRun { .. }),
        "Configuration resolved"
    );

    // Early check: a snapshot directory we cannot write to is a config error
    if let Some(dir) = &settings.json_output_dir {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(
                path = %dir,
                error = %e,
                "JSON output directory is not writable (fix perms or choose a different path)"
            );
            return ExitCode::FAILURE;
        }
    }

    let outcome = match &settings.destination {
        Destination::DryRun { table } => {
            let loader =
                WarehouseLoader::new(MemoryWarehouse::new(), table.clone(), TableSchema::articles());
            execute(&settings, loader).await
        }
        Destination::BigQuery {
            table,
            credentials,
            endpoint,
        } => {
            let backoff = Backoff::new(WAREHOUSE_ATTEMPTS, Duration::from_secs(1));
            match BigQueryWarehouse::connect(credentials, endpoint, backoff) {
                Ok(bigquery) => {
                    let loader =
                        WarehouseLoader::new(bigquery, table.clone(), TableSchema::articles());
                    execute(&settings, loader).await
                }
                Err(e) => return abort(e.into()),
            }
        }
    };

    if outcome.is_success() {
        export_snapshot(&settings, &outcome).await;
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        state = %outcome.state,
        "Execution complete"
    );

    outcome.exit_code()
}

async fn execute<W: Warehouse>(settings: &Settings, loader: WarehouseLoader<W>) -> RunOutcome {
    let harvester = PageHarvester::new(
        &settings.selectors.container,
        FieldExtractor::from(&settings.selectors),
        settings.render_timeout,
        settings.render_backoff,
    );
    let mut controller = RunController::new(harvester, loader, settings.target_url.clone());
    controller
        .run(|| HttpSession::open(&settings.user_agent, settings.render_timeout))
        .await
}

/// Write the JSON snapshot if a directory was configured. Failure is logged only.
async fn export_snapshot(settings: &Settings, outcome: &RunOutcome) {
    let Some(dir) = &settings.json_output_dir else {
        return;
    };
    let (Some(batch), Some(context), Some(report), Some(load)) =
        (&outcome.batch, &outcome.context, outcome.report, outcome.load)
    else {
        return;
    };

    let snapshot = RunSnapshot {
        scrape_date: context.scrape_date,
        target_url: context.base_url.as_str(),
        table: settings.destination.table().to_string(),
        report,
        rows_written: load.rows_written,
        articles: batch.records(),
    };
    if let Err(e) = write_snapshot(&snapshot, dir).await {
        warn!(error = %e, "Failed to write run snapshot; load result unaffected");
    }
}

/// Report a failure that happened before the run controller took over.
fn abort(e: RunError) -> ExitCode {
    error!(kind = e.kind(), error = %e, "Run aborted before start");
    ExitCode::FAILURE
}
