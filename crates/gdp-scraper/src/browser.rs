//! Browsing capability consumed by the scraper, plus selector evaluation.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::sources::SourceSelectors;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("browser failed to start under every launch profile: {}", attempts.join("; "))]
    Initialization { attempts: Vec<String> },
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },
    #[error("connectivity probe failed: {0}")]
    Probe(String),
    #[error("invalid selector `{selector}`: {message}")]
    InvalidSelector { selector: String, message: String },
}

/// One browser launch configuration. Profiles are tried in order until one starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchProfile {
    pub name: String,
    pub args: Vec<String>,
}

impl LaunchProfile {
    pub fn new(name: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn defaults() -> Vec<LaunchProfile> {
        vec![
            LaunchProfile::new(
                "headless-no-sandbox",
                &[
                    "--headless",
                    "--no-sandbox",
                    "--disable-setuid-sandbox",
                    "--disable-dev-shm-usage",
                    "--disable-gpu",
                ],
            ),
            LaunchProfile::new(
                "headless-new-minimal",
                &["--headless=new", "--no-sandbox", "--disable-setuid-sandbox"],
            ),
        ]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NavigateOptions {
    /// Upper bound for reaching a quiescent page.
    pub timeout: Duration,
    /// Extra wait after the load completes, for late network activity to settle.
    pub settle: Duration,
}

/// Raw field strings pulled from one grant container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTuple {
    pub title: Option<String>,
    pub description: Option<String>,
    pub amount: Option<String>,
    pub deadline: Option<String>,
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Box<dyn BrowserSession>, ScrapeError>;
}

/// A running browser shared by all sources of one run.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn PageContext>, ScrapeError>;

    async fn close(&mut self) -> Result<(), ScrapeError>;
}

/// A page context owned by exactly one source scrape.
#[async_trait]
pub trait PageContext: Send {
    async fn navigate(&mut self, url: &str, options: &NavigateOptions) -> Result<(), ScrapeError>;

    /// Serialized DOM of the current page.
    async fn content(&mut self) -> Result<String, ScrapeError>;

    async fn query_fields(&mut self, selectors: &SourceSelectors) -> Result<Vec<FieldTuple>, ScrapeError> {
        let html = self.content().await?;
        extract_field_tuples(&html, selectors)
    }

    async fn close(&mut self) -> Result<(), ScrapeError>;
}

fn parse_selector(selector: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(selector).map_err(|e| ScrapeError::InvalidSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

fn text_or_none(value: String) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn select_first_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

/// Evaluates source selectors against a rendered document: one tuple per
/// `grant_items` container, each field taken from the first matching
/// descendant.
pub fn extract_field_tuples(html: &str, selectors: &SourceSelectors) -> Result<Vec<FieldTuple>, ScrapeError> {
    let items = parse_selector(&selectors.grant_items)?;
    let title = parse_selector(&selectors.title)?;
    let description = parse_selector(&selectors.description)?;
    let amount = parse_selector(&selectors.amount)?;
    let deadline = parse_selector(&selectors.deadline)?;

    let document = Html::parse_document(html);
    Ok(document
        .select(&items)
        .map(|item| FieldTuple {
            title: select_first_text(&item, &title),
            description: select_first_text(&item, &description),
            amount: select_first_text(&item, &amount),
            deadline: select_first_text(&item, &deadline),
        })
        .collect())
}
