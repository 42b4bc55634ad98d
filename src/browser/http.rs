//! Browsing session over plain HTTP(S).
//!
//! This session does not execute JavaScript. It only covers listing pages
//! whose article blocks are present in the server-rendered markup; a page that
//! builds its listing client-side needs a headless-browser implementation of
//! [`BrowserSession`] instead.
//!
//! `wait_for` re-fetches the page on a fixed interval until the container
//! appears or the deadline passes. Every request, re-fetches included, is
//! bounded by the time left before that deadline, so a stalled origin cannot
//! stretch the wait past the configured render timeout.

use super::{BrowserSession, PageDocument};
use crate::error::ScrapeError;
use reqwest::Client;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, info, instrument, warn};
use url::Url;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct HttpSession {
    client: Client,
    navigation_timeout: Duration,
    poll_interval: Duration,
    current: Option<LoadedPage>,
}

#[derive(Debug)]
struct LoadedPage {
    requested: Url,
    final_url: Url,
    body: String,
}

impl HttpSession {
    /// Open a session that identifies itself with `user_agent`.
    ///
    /// # Arguments
    ///
    /// * `user_agent` - Value sent in the `User-Agent` header of every request
    /// * `navigation_timeout` - Upper bound for one `navigate` call, normally the render timeout
    ///
    /// # Errors
    ///
    /// [`ScrapeError::Navigation`] if the HTTP client cannot be built.
    pub fn open(user_agent: &str, navigation_timeout: Duration) -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(navigation_timeout)
            .build()
            .map_err(|e| ScrapeError::Navigation {
                url: String::new(),
                reason: format!("cannot build HTTP client: {e}"),
            })?;
        info!(?navigation_timeout, "HTTP browsing session opened");
        Ok(HttpSession {
            client,
            navigation_timeout,
            poll_interval: POLL_INTERVAL,
            current: None,
        })
    }

    async fn fetch(&self, url: &Url, limit: Duration) -> Result<LoadedPage, ScrapeError> {
        let navigation_error = |reason: String| ScrapeError::Navigation {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url.clone())
            .timeout(limit)
            .send()
            .await
            .map_err(|e| navigation_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(navigation_error(format!("HTTP status {status}")));
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| navigation_error(e.to_string()))?;

        debug!(%final_url, bytes = body.len(), "Fetched page");
        Ok(LoadedPage {
            requested: url.clone(),
            final_url,
            body,
        })
    }

    fn loaded(&self) -> Result<&LoadedPage, ScrapeError> {
        self.current
            .as_ref()
            .ok_or_else(|| ScrapeError::InvalidPage("no page loaded".to_string()))
    }
}

fn container_timeout(url: &Url, css: &str, timeout: Duration) -> ScrapeError {
    warn!(selector = css, ?timeout, "Container never appeared");
    ScrapeError::PageLoadTimeout {
        url: url.to_string(),
        selector: css.to_string(),
        timeout,
    }
}

impl BrowserSession for HttpSession {
    #[instrument(level = "info", skip(self), fields(%url))]
    async fn navigate(&mut self, url: &Url) -> Result<(), ScrapeError> {
        let page = self.fetch(url, self.navigation_timeout).await?;
        info!(final_url = %page.final_url, "Navigation complete");
        self.current = Some(page);
        Ok(())
    }

    #[instrument(level = "info", skip(self))]
    async fn wait_for(&mut self, css: &str, timeout: Duration) -> Result<(), ScrapeError> {
        let deadline = Instant::now() + timeout;
        let requested = self.loaded()?.requested.clone();

        loop {
            if self.snapshot()?.contains(css)? {
                debug!(selector = css, "Container present");
                return Ok(());
            }

            if Instant::now() + self.poll_interval >= deadline {
                return Err(container_timeout(&requested, css, timeout));
            }
            sleep(self.poll_interval).await;

            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout_at(deadline, self.fetch(&requested, remaining)).await {
                Ok(Ok(page)) => self.current = Some(page),
                Ok(Err(e)) => warn!(error = %e, "Re-fetch while waiting failed; keeping previous body"),
                Err(_) => return Err(container_timeout(&requested, css, timeout)),
            }
        }
    }

    fn snapshot(&self) -> Result<PageDocument, ScrapeError> {
        let page = self.loaded()?;
        Ok(PageDocument::parse(&page.body, page.final_url.clone()))
    }

    async fn close(&mut self) {
        if self.current.take().is_some() {
            debug!("Released loaded page");
        }
        info!("HTTP browsing session closed");
    }
}
