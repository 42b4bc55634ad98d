//! Error taxonomy for the harvest-and-load pipeline.
//!
//! Errors are split by how far they are allowed to travel:
//!
//! - [`ExtractError`] never leaves the Page Harvester. It is reduced to a
//!   counter and the offending block is skipped.
//! - [`ScrapeError`], [`WarehouseError`] and [`ConfigError`] are run-level and
//!   end up inside a [`RunError`], which the Run Controller turns into a single
//!   failure signal.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The article fields that must be present for a block to become a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Link,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Title => f.write_str("title"),
            Field::Link => f.write_str("link"),
        }
    }
}

/// Per-block failure while reading fields out of an article block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("required field `{0}` not found in article block")]
    MissingRequiredField(Field),

    #[error("extraction failed: {0}")]
    Extraction(String),
}

/// Failure to bring the target page into a harvestable state.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("timed out after {timeout:?} waiting for `{selector}` on {url}")]
    PageLoadTimeout {
        url: String,
        selector: String,
        timeout: Duration,
    },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("page is not ready for harvesting: {0}")]
    InvalidPage(String),
}

/// One column-level problem found while checking rows or a table against the schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Index of the offending row in the batch, `None` for table-level mismatches.
    pub row: Option<usize>,
    pub column: String,
    pub reason: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(row) => write!(f, "row {} column `{}`: {}", row, self.column, self.reason),
            None => write!(f, "table column `{}`: {}", self.column, self.reason),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum WarehouseError {
    #[error("batch rejected: {} schema violation(s), first: {}", .violations.len(), first_violation(.violations))]
    SchemaViolation { violations: Vec<SchemaViolation> },

    #[error("warehouse unreachable: {0}")]
    Connectivity(String),

    #[error("warehouse authentication failed: {0}")]
    Auth(String),
}

fn first_violation(violations: &[SchemaViolation]) -> String {
    violations
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "<none reported>".to_string())
}

impl From<reqwest::Error> for WarehouseError {
    fn from(e: reqwest::Error) -> Self {
        WarehouseError::Connectivity(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Fatal error that moves a run to `ABORTED`.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error("harvest produced no valid articles ({seen} block(s) seen)")]
    NoArticles { seen: usize },

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

impl RunError {
    /// Short machine-friendly name of the blocking error.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Config(_) => "config",
            RunError::Scrape(ScrapeError::PageLoadTimeout { .. }) => "page_load_timeout",
            RunError::Scrape(ScrapeError::Navigation { .. }) => "navigation",
            RunError::Scrape(ScrapeError::InvalidPage(_)) => "invalid_page",
            RunError::NoArticles { .. } => "no_articles",
            RunError::Warehouse(WarehouseError::SchemaViolation { .. }) => "schema_violation",
            RunError::Warehouse(WarehouseError::Connectivity(_)) => "warehouse_connectivity",
            RunError::Warehouse(WarehouseError::Auth(_)) => "warehouse_auth",
        }
    }
}
