//! Rendering capability used by the Page Harvester.
//!
//! The harvester never talks to a concrete browser. It drives a
//! [`BrowserSession`] (navigate, wait for an element, snapshot the DOM) and
//! reads fields through the [`DomBlock`] trait, which keeps field extraction
//! testable against hand-built blocks.
//!
//! | Implementation | Module | Notes |
//! |----------------|--------|-------|
//! | [`HttpSession`] | [`http`] | Fetches server-rendered HTML with `reqwest`, polls until the container is present |

pub mod http;

use crate::error::{ExtractError, ScrapeError};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use url::Url;

pub use http::HttpSession;

/// A live browsing session owned by the Run Controller for one run.
pub trait BrowserSession {
    /// Load `url` into the session.
    async fn navigate(&mut self, url: &Url) -> Result<(), ScrapeError>;

    /// Block until an element matching `css` is present, or fail with
    /// [`ScrapeError::PageLoadTimeout`] once `timeout` has elapsed.
    async fn wait_for(&mut self, css: &str, timeout: Duration) -> Result<(), ScrapeError>;

    /// Snapshot the current DOM for harvesting.
    fn snapshot(&self) -> Result<PageDocument, ScrapeError>;

    /// Tear the session down. Safe to call more than once.
    async fn close(&mut self);
}

/// Read-only access to one article block, by CSS selector relative to the block.
pub trait DomBlock {
    /// Text content of the first descendant matching `css`.
    fn find_text(&self, css: &str) -> Result<Option<String>, ExtractError>;

    /// Attribute `name` of the first descendant matching `css`.
    fn find_attr(&self, css: &str, name: &str) -> Result<Option<String>, ExtractError>;
}

pub(crate) fn parse_selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css)
        .map_err(|e| ExtractError::Extraction(format!("invalid selector `{css}`: {e}")))
}

impl DomBlock for ElementRef<'_> {
    fn find_text(&self, css: &str) -> Result<Option<String>, ExtractError> {
        let selector = parse_selector(css)?;
        Ok(self
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>()))
    }

    fn find_attr(&self, css: &str, name: &str) -> Result<Option<String>, ExtractError> {
        let selector = parse_selector(css)?;
        Ok(self
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr(name))
            .map(str::to_string))
    }
}

/// A parsed snapshot of the rendered page.
#[derive(Debug)]
pub struct PageDocument {
    html: Html,
    url: Url,
}

impl PageDocument {
    pub fn parse(body: &str, url: Url) -> Self {
        PageDocument {
            html: Html::parse_document(body),
            url,
        }
    }

    /// Final URL of the page, used as the base for relative links.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Every element matching `css`, in document order.
    pub fn blocks(&self, css: &str) -> Result<Vec<ElementRef<'_>>, ScrapeError> {
        let selector = Selector::parse(css)
            .map_err(|e| ScrapeError::InvalidPage(format!("invalid container selector `{css}`: {e}")))?;
        Ok(self.html.select(&selector).collect())
    }

    pub fn contains(&self, css: &str) -> Result<bool, ScrapeError> {
        Ok(!self.blocks(css)?.is_empty())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process [`BrowserSession`] serving fixed HTML.

    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug, Default, Clone)]
    pub struct SessionProbe {
        pub navigations: Rc<Cell<usize>>,
        pub closes: Rc<Cell<usize>>,
    }

    #[derive(Debug)]
    pub struct StaticSession {
        html: String,
        loaded: Option<Url>,
        pub probe: SessionProbe,
    }

    impl StaticSession {
        pub fn new(html: &str) -> Self {
            StaticSession {
                html: html.to_string(),
                loaded: None,
                probe: SessionProbe::default(),
            }
        }
    }

    impl BrowserSession for StaticSession {
        async fn navigate(&mut self, url: &Url) -> Result<(), ScrapeError> {
            self.probe.navigations.set(self.probe.navigations.get() + 1);
            self.loaded = Some(url.clone());
            Ok(())
        }

        async fn wait_for(&mut self, css: &str, timeout: Duration) -> Result<(), ScrapeError> {
            let (present, url) = {
                let doc = self.snapshot()?;
                (doc.contains(css)?, doc.url().to_string())
            };
            if present {
                return Ok(());
            }
            tokio::time::sleep(timeout).await;
            Err(ScrapeError::PageLoadTimeout {
                url,
                selector: css.to_string(),
                timeout,
            })
        }

        fn snapshot(&self) -> Result<PageDocument, ScrapeError> {
            let url = self
                .loaded
                .clone()
                .ok_or_else(|| ScrapeError::InvalidPage("no page loaded".to_string()))?;
            Ok(PageDocument::parse(&self.html, url))
        }

        async fn close(&mut self) {
            self.probe.closes.set(self.probe.closes.get() + 1);
            self.loaded = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="item"><h2 class="titulo"><a href="/one">One</a></h2></div>
          <div class="item"><h2 class="titulo"><a href="/two">  Two
             words </a></h2><img src="/two.jpg"></div>
        </body></html>"#;

    fn doc() -> PageDocument {
        PageDocument::parse(PAGE, Url::parse("https://news.example.com/list/").unwrap())
    }

    #[test]
    fn test_blocks_in_document_order() {
        let doc = doc();
        let blocks = doc.blocks(".item").unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].find_text(".titulo a").unwrap().as_deref(), Some("One"));
        assert_eq!(blocks[1].find_attr(".titulo a", "href").unwrap().as_deref(), Some("/two"));
    }

    #[test]
    fn test_lookups_are_scoped_to_the_block() {
        let doc = doc();
        let blocks = doc.blocks(".item").unwrap();
        assert_eq!(blocks[0].find_attr("img", "src").unwrap(), None);
        assert_eq!(blocks[1].find_attr("img", "src").unwrap().as_deref(), Some("/two.jpg"));
    }

    #[test]
    fn test_invalid_selectors_are_errors() {
        let doc = doc();
        assert!(matches!(doc.blocks("[[["), Err(ScrapeError::InvalidPage(_))));
        let blocks = doc.blocks(".item").unwrap();
        assert!(matches!(blocks[0].find_text("a[["), Err(ExtractError::Extraction(_))));
    }

    #[test]
    fn test_contains() {
        let doc = doc();
        assert!(doc.contains(".item").unwrap());
        assert!(!doc.contains(".missing").unwrap());
    }
}
