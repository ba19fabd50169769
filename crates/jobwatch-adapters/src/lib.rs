//! Listing adapter contracts + the Upwork search-page extractor.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobwatch_core::{JobRecord, NOT_FOUND};
use jobwatch_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "jobwatch-adapters";

pub const UPWORK_SOURCE_ID: &str = "upwork";
pub const UPWORK_BASE_URL: &str = "https://www.upwork.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedPage {
    /// Load a page that was rendered and saved by an external browser.
    pub fn from_html_file(path: impl AsRef<Path>, url: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        let body = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Ok(Self {
            url: url.into(),
            content_type: "text/html".to_string(),
            body,
            fetched_at: Utc::now(),
        })
    }

    pub fn html(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingTarget {
    pub url: String,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

#[async_trait]
pub trait ListingAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        target: &ListingTarget,
    ) -> Result<FetchedPage, AdapterError>;

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<JobRecord>, AdapterError>;
}

/// Selectors for one search-result tile and the fields inside it.
#[derive(Debug, Clone, Copy)]
struct TileSelectors {
    tile: &'static str,
    title: &'static str,
    posted: &'static str,
    payment_info: &'static str,
    link: &'static str,
}

const UPWORK_SELECTORS: TileSelectors = TileSelectors {
    tile: "article.job-tile.air3-card",
    title: "h2.job-tile-title",
    posted: "small.text-light",
    payment_info: "ul.job-tile-info-list",
    link: "a.up-n-link",
};

#[derive(Debug, Clone, Copy)]
pub struct UpworkAdapter {
    base_url: &'static str,
}

impl Default for UpworkAdapter {
    fn default() -> Self {
        Self {
            base_url: UPWORK_BASE_URL,
        }
    }
}

#[async_trait]
impl ListingAdapter for UpworkAdapter {
    fn source_id(&self) -> &'static str {
        UPWORK_SOURCE_ID
    }

    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        target: &ListingTarget,
    ) -> Result<FetchedPage, AdapterError> {
        let resp = http.fetch_bytes(&target.url).await?;
        Ok(FetchedPage {
            url: resp.final_url,
            content_type: resp.content_type.unwrap_or_else(|| "text/html".to_string()),
            body: resp.body,
            fetched_at: Utc::now(),
        })
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<JobRecord>, AdapterError> {
        let document = Html::parse_document(&page.html());
        parse_tiles(&document, &UPWORK_SELECTORS, self.base_url)
    }
}

pub fn upwork_adapter() -> impl ListingAdapter {
    UpworkAdapter::default()
}

pub fn adapter_for_source(source_id: &str) -> Option<Box<dyn ListingAdapter>> {
    match source_id {
        UPWORK_SOURCE_ID => Some(Box::new(upwork_adapter())),
        _ => None,
    }
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(e.to_string()))
}

fn parse_tiles(
    document: &Html,
    selectors: &TileSelectors,
    base_url: &str,
) -> Result<Vec<JobRecord>, AdapterError> {
    let tile = selector(selectors.tile)?;
    let title = selector(selectors.title)?;
    let posted = selector(selectors.posted)?;
    let payment_info = selector(selectors.payment_info)?;
    let link = selector(selectors.link)?;

    Ok(document
        .select(&tile)
        .map(|article| JobRecord {
            title: first_text(article, &title),
            posted: first_text(article, &posted),
            payment_info: first_text(article, &payment_info),
            link: first_href(article, &link, base_url),
        })
        .collect())
}

fn first_text(scope: ElementRef<'_>, sel: &Selector) -> String {
    scope
        .select(sel)
        .next()
        .map(|n| n.text().collect::<String>())
        .unwrap_or_else(|| NOT_FOUND.to_string())
}

fn first_href(scope: ElementRef<'_>, sel: &Selector, base_url: &str) -> String {
    scope
        .select(sel)
        .next()
        .and_then(|n| n.value().attr("href"))
        .map(|href| absolutize(base_url, href))
        .unwrap_or_else(|| NOT_FOUND.to_string())
}

fn absolutize(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if href.starts_with("//") {
        let scheme = base_url.split_once("//").map_or("https:", |(scheme, _)| scheme);
        format!("{scheme}{href}")
    } else {
        format!("{base_url}{href}")
    }
}
