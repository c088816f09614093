//! SEO lookup handler
//!
//! Fetches a search results page for a term and reports the result links
//! in ranking order together with the raw page.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::SeoSettings;
use crate::error::{Error, Result};

use super::JobHandler;

/// Service name the SEO handler is registered under
pub const SEO_SERVICE_NAME: &str = "SEO";

// ─────────────────────────────────────────────────────────────────
// Search Fetcher
// ─────────────────────────────────────────────────────────────────

/// Retrieves the HTML of a search results page
#[async_trait]
pub trait SearchFetcher: Send + Sync {
    async fn fetch(&self, term: &str) -> Result<String>;
}

/// Fetches results over HTTP, passing the term as the `q` parameter
pub struct HttpSearchFetcher {
    client: reqwest::Client,
    search_url: String,
}

impl HttpSearchFetcher {
    pub fn new(settings: &SeoSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            search_url: settings.search_url.clone(),
        })
    }
}

#[async_trait]
impl SearchFetcher for HttpSearchFetcher {
    async fn fetch(&self, term: &str) -> Result<String> {
        debug!(url = %self.search_url, term = %term, "Fetching search results");

        let resp = self
            .client
            .get(&self.search_url)
            .query(&[("q", term)])
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| Error::handler_failed(SEO_SERVICE_NAME, e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::handler_failed(
                SEO_SERVICE_NAME,
                format!("search request returned {}", resp.status()),
            ));
        }

        resp.text()
            .await
            .map_err(|e| Error::handler_failed(SEO_SERVICE_NAME, e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────
// Handler
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SeoRequest {
    #[serde(alias = "term")]
    search_term: String,
}

/// Handler for `"SEO"` jobs
pub struct SeoLookupHandler {
    fetcher: Box<dyn SearchFetcher>,
    link_selector: Selector,
}

impl SeoLookupHandler {
    pub fn new(fetcher: Box<dyn SearchFetcher>, link_selector: &str) -> Result<Self> {
        let link_selector = Selector::parse(link_selector).map_err(|e| {
            Error::config_field_invalid(
                "handlers.seo.link_selector",
                format!("invalid CSS selector '{}': {}", link_selector, e),
            )
        })?;

        Ok(Self {
            fetcher,
            link_selector,
        })
    }

    pub fn from_settings(settings: &SeoSettings) -> Result<Self> {
        let fetcher = HttpSearchFetcher::new(settings)?;
        Self::new(Box::new(fetcher), &settings.link_selector)
    }

    /// Link targets of every element matching the selector, in document order
    fn extract_rankings(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        document
            .select(&self.link_selector)
            .filter_map(|el| el.value().attr("href"))
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl JobHandler for SeoLookupHandler {
    async fn execute(&self, details: Value) -> Result<Value> {
        let request: SeoRequest = serde_json::from_value(details)
            .map_err(|e| Error::invalid_payload(format!("SEO request needs a search_term: {}", e)))?;
        if request.search_term.trim().is_empty() {
            return Err(Error::invalid_payload("search_term is empty"));
        }

        let html = self.fetcher.fetch(&request.search_term).await?;
        let rankings = self.extract_rankings(&html);

        info!(term = %request.search_term, rankings = rankings.len(), "SEO lookup complete");

        Ok(json!({
            "rankings": rankings,
            "rawHTML": html,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
