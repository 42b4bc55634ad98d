//! Data models for one harvest-and-load run.
//!
//! - [`ExtractedFields`]: raw field values read out of one article block
//! - [`ArticleRecord`]: the validated, enriched unit written to the warehouse
//! - [`RunContext`]: the run-wide values shared by every record of a batch
//! - [`HarvestReport`]: block counters produced by one harvest pass
//! - [`Batch`]: the ordered records of one harvest pass

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use url::Url;

/// Field values read from a single article block, before validation.
///
/// Optional fields are empty strings when the block does not carry them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    pub title: String,
    pub kicker: String,
    pub link: String,
    pub image: String,
}

/// A news listing normalized into the warehouse row shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleRecord {
    pub title: String,
    pub kicker: String,
    pub link: String,
    pub image: String,
    pub title_word_count: usize,
    pub title_char_count: usize,
    pub capital_words: Vec<String>,
    pub scrape_date: DateTime<Utc>,
}

/// Values captured once per run and passed explicitly to the harvester and assembler.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Capture time shared by every record of the run.
    pub scrape_date: DateTime<Utc>,
    /// Base for resolving relative `link` and `image` values.
    pub base_url: Url,
}

impl RunContext {
    /// Capture the run timestamp now.
    pub fn capture(base_url: Url) -> Self {
        RunContext {
            scrape_date: Utc::now(),
            base_url,
        }
    }

    /// Identifier of the run, derived from its capture time.
    ///
    /// Used as the prefix of per-row insert ids so a retried append within the
    /// same run is recognised by the warehouse.
    pub fn run_id(&self) -> String {
        format!("run-{}", self.scrape_date.timestamp_micros())
    }

    pub fn scrape_date_rfc3339(&self) -> String {
        self.scrape_date.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

/// Block counters for one harvest pass.
///
/// `seen == accepted + rejected + failed` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HarvestReport {
    pub seen: usize,
    pub accepted: usize,
    /// Blocks missing a title or link, or refused by the record validity gate.
    pub rejected: usize,
    /// Blocks skipped because of an unexpected extraction error.
    pub failed: usize,
}

/// Ordered records from one harvest pass, in document order of their blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Batch {
    records: Vec<ArticleRecord>,
}

impl Batch {
    pub fn new(records: Vec<ArticleRecord>) -> Self {
        Batch { records }
    }

    pub fn records(&self) -> &[ArticleRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(title: &str) -> ArticleRecord {
        ArticleRecord {
            title: title.to_string(),
            kicker: String::new(),
            link: "https://example.com/a".to_string(),
            image: String::new(),
            title_word_count: 1,
            title_char_count: title.chars().count(),
            capital_words: vec![title.to_string()],
            scrape_date: Utc.with_ymd_and_hms(2025, 5, 6, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_record_serialization() {
        let json = serde_json::to_value(record("Headline")).unwrap();
        assert_eq!(json["title"], "Headline");
        assert_eq!(json["capital_words"][0], "Headline");
        assert_eq!(json["scrape_date"], "2025-05-06T12:00:00Z");
    }

    #[test]
    fn test_batch_preserves_order() {
        let batch = Batch::new(vec![record("First"), record("Second"), record("Third")]);
        let titles: Vec<&str> = batch.records().iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second", "Third"]);
        assert_eq!(batch.len(), 3);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_run_context_formats() {
        let ctx = RunContext {
            scrape_date: Utc.with_ymd_and_hms(2025, 5, 6, 12, 0, 0).unwrap(),
            base_url: Url::parse("https://example.com/").unwrap(),
        };
        assert_eq!(ctx.scrape_date_rfc3339(), "2025-05-06T12:00:00.000000Z");
        assert_eq!(ctx.run_id(), format!("run-{}", 1_746_532_800_000_000i64));
    }
}
