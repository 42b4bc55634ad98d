//! Page Harvester: renders the listing page and turns its article blocks into a batch.
//!
//! Per-block failures stop here. A block with no title or link is counted as
//! rejected, a block whose lookup blew up is counted as failed, and neither
//! affects the blocks around it. Only render failures leave this module.

use crate::browser::{BrowserSession, DomBlock, PageDocument};
use crate::error::{ExtractError, ScrapeError};
use crate::models::{Batch, HarvestReport, RunContext};
use crate::retry::Backoff;
use crate::scrapers::assembler::assemble;
use crate::scrapers::extractor::FieldExtractor;
use crate::utils::truncate_for_log;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Output of one harvest pass.
#[derive(Debug, Clone)]
pub struct Harvest {
    pub batch: Batch,
    pub report: HarvestReport,
    pub context: RunContext,
}

#[derive(Debug, Clone)]
pub struct PageHarvester {
    /// Selector matching one repeating article block.
    container: String,
    extractor: FieldExtractor,
    render_timeout: Duration,
    backoff: Backoff,
}

impl PageHarvester {
    pub fn new(
        container: &str,
        extractor: FieldExtractor,
        render_timeout: Duration,
        backoff: Backoff,
    ) -> Self {
        PageHarvester {
            container: container.to_string(),
            extractor,
            render_timeout,
            backoff,
        }
    }

    /// Harvest a rendered page, capturing the run timestamp now that the page is ready.
    pub fn harvest(&self, page: &PageDocument) -> Result<Harvest, ScrapeError> {
        let context = RunContext::capture(page.url().clone());
        let (batch, report) = self.collect(page, &context)?;
        Ok(Harvest {
            batch,
            report,
            context,
        })
    }

    /// Navigate to `url` and wait for the article container, retrying per the backoff policy.
    ///
    /// # Errors
    ///
    /// The error of the last attempt, typically [`ScrapeError::PageLoadTimeout`].
    #[instrument(level = "info", skip(self, session), fields(%url, container = %self.container))]
    pub async fn render<S: BrowserSession>(
        &self,
        session: &mut S,
        url: &Url,
    ) -> Result<PageDocument, ScrapeError> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match self.render_once(session, url).await {
                Ok(page) => {
                    info!(attempt, "Listing container present");
                    return Ok(page);
                }
                Err(e) if self.backoff.allows_retry(attempt) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        attempt,
                        max = self.backoff.max_attempts(),
                        ?delay,
                        error = %e,
                        "Render attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
                Err(e) => {
                    error!(attempt, error = %e, "Render failed; no attempts left");
                    return Err(e);
                }
            }
        }
    }

    async fn render_once<S: BrowserSession>(
        &self,
        session: &mut S,
        url: &Url,
    ) -> Result<PageDocument, ScrapeError> {
        session.navigate(url).await?;
        session.wait_for(&self.container, self.render_timeout).await?;
        session.snapshot()
    }

    /// Extract and assemble every article block of `page`, in document order.
    pub fn collect(
        &self,
        page: &PageDocument,
        ctx: &RunContext,
    ) -> Result<(Batch, HarvestReport), ScrapeError> {
        let blocks = page.blocks(&self.container)?;
        info!(count = blocks.len(), "Found article blocks");
        Ok(self.collect_blocks(&blocks, ctx))
    }

    pub fn collect_blocks<B: DomBlock>(
        &self,
        blocks: &[B],
        ctx: &RunContext,
    ) -> (Batch, HarvestReport) {
        let mut report = HarvestReport::default();
        let mut records = Vec::with_capacity(blocks.len());

        for (index, block) in blocks.iter().enumerate() {
            report.seen += 1;
            match self.extractor.extract(block, &ctx.base_url) {
                Ok(fields) => match assemble(fields, ctx) {
                    Some(record) => {
                        debug!(
                            index,
                            title = %truncate_for_log(&record.title, 50),
                            kicker = %truncate_for_log(&record.kicker, 50),
                            "Accepted article"
                        );
                        report.accepted += 1;
                        records.push(record);
                    }
                    None => report.rejected += 1,
                },
                Err(ExtractError::MissingRequiredField(field)) => {
                    debug!(index, %field, "Skipping block without required field");
                    report.rejected += 1;
                }
                Err(e) => {
                    warn!(index, error = %e, "Skipping block after extraction error");
                    report.failed += 1;
                }
            }
        }

        info!(
            seen = report.seen,
            accepted = report.accepted,
            rejected = report.rejected,
            failed = report.failed,
            "Harvest pass complete"
        );
        (Batch::new(records), report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::StaticSession;
    use crate::config::SelectorConfig;
    use crate::error::Field;
    use chrono::{TimeZone, Utc};
    use std::fmt::Write;

    const CONTAINER: &str = ".contenedor_dato_modulo";

    fn harvester() -> PageHarvester {
        let selectors = SelectorConfig::default();
        PageHarvester::new(
            &selectors.container,
            FieldExtractor::from(&selectors),
            Duration::from_millis(5),
            Backoff::none(),
        )
    }

    fn block(i: usize, with_link: bool) -> String {
        let href = if with_link {
            format!(r#" href="/international/news/{i}""#)
        } else {
            String::new()
        };
        format!(
            r#"<div class="contenedor_dato_modulo">
                 <div class="volanta">Kicker {i}</div>
                 <h2 class="titulo"><a{href}>Headline Number {i}</a></h2>
               </div>"#
        )
    }

    fn listing(blocks: &[String]) -> String {
        let mut html = String::from("<html><body><main>");
        for b in blocks {
            writeln!(html, "{b}").unwrap();
        }
        html.push_str("</main></body></html>");
        html
    }

    fn url() -> Url {
        Url::parse("https://www.yogonet.com/international/").unwrap()
    }

    async fn harvest_html(html: &str) -> Result<Harvest, ScrapeError> {
        let harvester = harvester();
        let mut session = StaticSession::new(html);
        let page = harvester.render(&mut session, &url()).await?;
        harvester.harvest(&page)
    }

    #[tokio::test]
    async fn test_ten_blocks_two_without_link() {
        let blocks: Vec<String> = (0..10).map(|i| block(i, i != 3 && i != 7)).collect();
        let harvest = harvest_html(&listing(&blocks)).await.unwrap();

        assert_eq!(harvest.batch.len(), 8);
        assert_eq!(
            harvest.report,
            HarvestReport { seen: 10, accepted: 8, rejected: 2, failed: 0 }
        );
    }

    #[tokio::test]
    async fn test_batch_follows_document_order() {
        let blocks: Vec<String> = (0..5).map(|i| block(i, true)).collect();
        let harvest = harvest_html(&listing(&blocks)).await.unwrap();
        let titles: Vec<&str> = harvest.batch.records().iter().map(|r| r.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Headline Number 0",
                "Headline Number 1",
                "Headline Number 2",
                "Headline Number 3",
                "Headline Number 4",
            ]
        );
        assert!(harvest
            .batch
            .records()
            .iter()
            .all(|r| r.scrape_date == harvest.context.scrape_date));
        assert_eq!(
            harvest.batch.records()[2].link,
            "https://www.yogonet.com/international/news/2"
        );
    }

    #[tokio::test]
    async fn test_missing_container_times_out() {
        let err = harvest_html("<html><body><p>Loading…</p></body></html>")
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::PageLoadTimeout { .. }));
    }

    #[tokio::test]
    async fn test_render_retries_before_giving_up() {
        let mut session = StaticSession::new("<html><body></body></html>");
        let probe = session.probe.clone();
        let selectors = SelectorConfig::default();
        let harvester = PageHarvester::new(
            CONTAINER,
            FieldExtractor::from(&selectors),
            Duration::from_millis(1),
            Backoff::new(3, Duration::from_millis(1)).without_jitter(),
        );

        assert!(harvester.render(&mut session, &url()).await.is_err());
        assert_eq!(probe.navigations.get(), 3);
    }

    struct BrokenBlock;

    impl DomBlock for BrokenBlock {
        fn find_text(&self, _css: &str) -> Result<Option<String>, ExtractError> {
            Err(ExtractError::Extraction("detached node".to_string()))
        }

        fn find_attr(&self, _css: &str, _name: &str) -> Result<Option<String>, ExtractError> {
            Err(ExtractError::Extraction("detached node".to_string()))
        }
    }

    struct TitleOnly;

    impl DomBlock for TitleOnly {
        fn find_text(&self, _css: &str) -> Result<Option<String>, ExtractError> {
            Ok(Some("Orphan Headline".to_string()))
        }

        fn find_attr(&self, _css: &str, _name: &str) -> Result<Option<String>, ExtractError> {
            Ok(None)
        }
    }

    #[test]
    fn test_unexpected_errors_are_counted_not_fatal() {
        let ctx = RunContext {
            scrape_date: Utc.with_ymd_and_hms(2025, 5, 6, 0, 0, 0).unwrap(),
            base_url: url(),
        };
        let (batch, report) = harvester().collect_blocks(&[BrokenBlock, BrokenBlock], &ctx);
        assert!(batch.is_empty());
        assert_eq!(report, HarvestReport { seen: 2, accepted: 0, rejected: 0, failed: 2 });

        let (batch, report) = harvester().collect_blocks(&[TitleOnly], &ctx);
        assert!(batch.is_empty());
        assert_eq!(report.rejected, 1);
        assert_eq!(
            FieldExtractor::from(&SelectorConfig::default()).extract(&TitleOnly, &url()),
            Err(ExtractError::MissingRequiredField(Field::Link))
        );
    }

    #[tokio::test]
    async fn test_optional_fields_missing_still_accepted() {
        let html = listing(&[
            r#"<div class="contenedor_dato_modulo"><h2 class="titulo"><a href="/a">No Kicker</a></h2><img src="/a.jpg"></div>"#.to_string(),
            r#"<div class="contenedor_dato_modulo"><div class="volanta">Tag</div><h2 class="titulo"><a href="/b">No Image</a></h2></div>"#.to_string(),
        ]);
        let harvest = harvest_html(&html).await.unwrap();

        let records = harvest.batch.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kicker, "");
        assert_eq!(records[0].image, "https://www.yogonet.com/a.jpg");
        assert_eq!(records[1].kicker, "Tag");
        assert_eq!(records[1].image, "");
    }
}
