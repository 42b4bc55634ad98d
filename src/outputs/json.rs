//! JSON snapshot of a run.
//!
//! Files are grouped by the UTC date of the run's scrape timestamp and named
//! after its time of day, so two runs on the same day never collide unless
//! they start within the same second.

use crate::models::{ArticleRecord, HarvestReport};
use crate::utils::ensure_writable_dir;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::error::Error;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

/// Everything one run produced, as written to disk.
#[derive(Debug, Serialize)]
pub struct RunSnapshot<'a> {
    pub scrape_date: DateTime<Utc>,
    pub target_url: &'a str,
    pub table: String,
    pub report: HarvestReport,
    pub rows_written: usize,
    pub articles: &'a [ArticleRecord],
}

impl RunSnapshot<'_> {
    fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.scrape_date.format("%Y-%m-%d").to_string()).join(format!(
            "news_scraper_results_{}.json",
            self.scrape_date.format("%H%M%S")
        ))
    }
}

/// Write `snapshot` under `json_output_dir` and return the file path.
///
/// # Output Path
///
/// `{json_output_dir}/{YYYY-MM-DD}/news_scraper_results_{HHMMSS}.json`
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir))]
pub async fn write_snapshot(
    snapshot: &RunSnapshot<'_>,
    json_output_dir: &str,
) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
    let json = serde_json::to_string_pretty(snapshot)?;
    let path = PathBuf::from(json_output_dir).join(snapshot.relative_path());

    if let Some(parent) = path.parent() {
        let parent = parent.to_string_lossy();
        if let Err(e) = ensure_writable_dir(&parent).await {
            error!(dir = %parent, error = %e, "Snapshot directory is not writable");
            return Err(e);
        }
    }

    fs::write(&path, json).await?;
    info!(path = %path.display(), articles = snapshot.articles.len(), "Wrote run snapshot");
    Ok(path)
}
