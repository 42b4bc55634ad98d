//! Command-line interface definitions.
//!
//! Every option can also come from the environment, and any option given here
//! overrides the same setting in the YAML config file.

use clap::Parser;
use std::path::PathBuf;

/// Harvest one news listing page and append the batch to a warehouse table.
///
/// # Examples
///
/// ```sh
/// # Load into BigQuery using the environment for the destination
/// GCP_PROJECT_ID=acme BQ_DATASET_ID=news BQ_TABLE_ID=articles \
///   GOOGLE_APPLICATION_CREDENTIALS=./token.txt news_warehouse
///
/// # Try a config without touching the warehouse, keeping a JSON snapshot
/// news_warehouse -c scraper.yaml --dry-run -j ./output
/// ```
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Listing page to harvest
    #[arg(short, long, env = "TARGET_URL")]
    pub url: Option<String>,

    /// Seconds to wait for the article container to appear
    #[arg(long, env = "RENDER_TIMEOUT_SECS")]
    pub render_timeout: Option<u64>,

    /// Warehouse project
    #[arg(long, env = "GCP_PROJECT_ID")]
    pub project: Option<String>,

    /// Warehouse dataset
    #[arg(long, env = "BQ_DATASET_ID")]
    pub dataset: Option<String>,

    /// Warehouse table
    #[arg(long, env = "BQ_TABLE_ID")]
    pub table: Option<String>,

    /// File holding the warehouse access token
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// Directory for the JSON snapshot of each successful run
    #[arg(short, long)]
    pub json_output_dir: Option<String>,

    /// Load into an in-memory table instead of the warehouse
    #[arg(long)]
    pub dry_run: bool,
}
