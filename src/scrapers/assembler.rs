//! Record Assembler: the single validity gate between extraction and the batch.

use crate::metrics::TitleMetrics;
use crate::models::{ArticleRecord, ExtractedFields, RunContext};
use crate::utils::{collapse_whitespace, truncate_for_log};
use tracing::debug;

/// Combine extracted fields, derived title metrics and the run timestamp.
///
/// # Arguments
///
/// * `fields` - Raw values read out of one article block
/// * `ctx` - Run context; its `scrape_date` is stamped on every record
///
/// # Returns
///
/// `None` when the title or link is empty after trimming; no other field can
/// cause a rejection. Missing kicker or image become empty strings.
pub fn assemble(fields: ExtractedFields, ctx: &RunContext) -> Option<ArticleRecord> {
    let title = collapse_whitespace(&fields.title);
    let link = fields.link.trim().to_string();

    if title.is_empty() || link.is_empty() {
        debug!(
            title = %truncate_for_log(&title, 50),
            link = %link,
            "Rejected article: empty title or link"
        );
        return None;
    }

    let metrics = TitleMetrics::derive(&title);
    Some(ArticleRecord {
        title,
        kicker: collapse_whitespace(&fields.kicker),
        link,
        image: fields.image.trim().to_string(),
        title_word_count: metrics.word_count,
        title_char_count: metrics.char_count,
        capital_words: metrics.capital_words,
        scrape_date: ctx.scrape_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use url::Url;

    fn ctx() -> RunContext {
        RunContext {
            scrape_date: Utc.with_ymd_and_hms(2025, 5, 6, 9, 30, 0).unwrap(),
            base_url: Url::parse("https://news.example.com/").unwrap(),
        }
    }

    fn fields(title: &str, link: &str) -> ExtractedFields {
        ExtractedFields {
            title: title.to_string(),
            kicker: String::new(),
            link: link.to_string(),
            image: String::new(),
        }
    }

    #[test]
    fn test_assemble_derives_metrics() {
        let record = assemble(
            fields(" Breaking:  Markets Rally as Rates Fall ", "https://news.example.com/a"),
            &ctx(),
        )
        .unwrap();
        assert_eq!(record.title, "Breaking: Markets Rally as Rates Fall");
        assert_eq!(record.title_word_count, 6);
        assert_eq!(record.title_char_count, 37);
        assert_eq!(record.capital_words.len(), 5);
        assert_eq!(record.scrape_date, ctx().scrape_date);
    }

    #[test]
    fn test_rejects_blank_title_or_link() {
        assert!(assemble(fields("", "https://news.example.com/a"), &ctx()).is_none());
        assert!(assemble(fields(" \n\t ", "https://news.example.com/a"), &ctx()).is_none());
        assert!(assemble(fields("Has title", ""), &ctx()).is_none());
        assert!(assemble(fields("Has title", "   "), &ctx()).is_none());
    }

    #[test]
    fn test_optional_fields_never_reject() {
        let record = assemble(fields("Only Required", "https://news.example.com/b"), &ctx()).unwrap();
        assert_eq!(record.kicker, "");
        assert_eq!(record.image, "");
    }

    #[test]
    fn test_records_share_run_timestamp() {
        let ctx = ctx();
        let a = assemble(fields("First", "https://news.example.com/1"), &ctx).unwrap();
        let b = assemble(fields("Second", "https://news.example.com/2"), &ctx).unwrap();
        assert_eq!(a.scrape_date, b.scrape_date);
    }
}
