//! Source scraping: browser lifecycle, per-source extraction, fallback dataset.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gdp_core::{classify, CandidateRecord, EligibilityCategory, GrantRecord, Origin};
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};

pub mod browser;
pub mod fallback;
pub mod sources;
pub mod webdriver;

pub use browser::{
    extract_field_tuples, BrowserLauncher, BrowserSession, FieldTuple, LaunchProfile, NavigateOptions, PageContext,
    ScrapeError,
};
pub use fallback::fallback_grants;
pub use sources::{SourceConfig, SourceConfigError, SourceRegistry, SourceSelectors};
pub use webdriver::{WebDriverLauncher, DEFAULT_WEBDRIVER_URL};

pub const CRATE_NAME: &str = "gdp-scraper";

pub const MIN_POLITENESS_DELAY: Duration = Duration::from_secs(1);

const DEFAULT_DESCRIPTION: &str = "No description available";
const DEFAULT_AMOUNT: &str = "Contact for details";
const DEFAULT_DEADLINE: &str = "Ongoing";

/// Known-reachable page loaded once per run before any source is scraped.
#[derive(Debug, Clone)]
pub struct ConnectivityProbe {
    pub url: String,
    /// Text the probe page must contain for the network to count as up.
    pub marker: String,
    pub timeout: Duration,
}

impl Default for ConnectivityProbe {
    fn default() -> Self {
        Self {
            url: "https://httpbin.org/get".to_string(),
            marker: "httpbin".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub launch_profiles: Vec<LaunchProfile>,
    pub launch_timeout: Duration,
    pub navigation: NavigateOptions,
    pub extraction_timeout: Duration,
    pub probe: Option<ConnectivityProbe>,
    /// Pause before each navigation after the first; never shorter than one second.
    pub politeness_delay: Duration,
    pub min_title_chars: usize,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            launch_profiles: LaunchProfile::defaults(),
            launch_timeout: Duration::from_secs(30),
            navigation: NavigateOptions {
                timeout: Duration::from_secs(30),
                settle: Duration::from_millis(500),
            },
            extraction_timeout: Duration::from_secs(10),
            probe: Some(ConnectivityProbe::default()),
            politeness_delay: Duration::from_secs(2),
            min_title_chars: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    BrowserUnavailable,
    NetworkUnreachable,
    NoRecords,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Scraped { found: usize, kept: usize },
    Failed { error: String },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOutcome {
    pub source_name: String,
    pub status: SourceStatus,
}

/// Everything one scrape produced. Records are in source-processing order,
/// followed by the fallback dataset when it was needed.
#[derive(Debug, Clone)]
pub struct ScrapeReport {
    pub records: Vec<GrantRecord>,
    pub sources: Vec<SourceOutcome>,
    pub fallback: Option<FallbackReason>,
    pub discovered_at: DateTime<Utc>,
}

impl ScrapeReport {
    pub fn scraped_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.origin == Origin::Scraped)
            .count()
    }
}

pub struct GrantScraper {
    launcher: Arc<dyn BrowserLauncher>,
    sources: Vec<SourceConfig>,
    config: ScraperConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl GrantScraper {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, sources: Vec<SourceConfig>, config: ScraperConfig) -> Self {
        Self {
            launcher,
            sources,
            config,
            shutdown: None,
        }
    }

    /// Once the flag flips to `true` the current source finishes and the rest are skipped.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    /// Scrapes every source in order. Never fails: per-source errors are
    /// logged and count as zero records, and a run that would otherwise be
    /// empty gets the fallback dataset.
    pub async fn scrape_all_sources(&self) -> ScrapeReport {
        let span = info_span!("scrape_all_sources", sources = self.sources.len());
        self.scrape_all_sources_inner().instrument(span).await
    }

    async fn scrape_all_sources_inner(&self) -> ScrapeReport {
        let discovered_at = Utc::now();

        let mut session = match self.launch().await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "browser unavailable, using fallback grants only");
                return self.fallback_report(discovered_at, FallbackReason::BrowserUnavailable);
            }
        };

        if let Some(probe) = &self.config.probe {
            if let Err(err) = self.check_connectivity(session.as_ref(), probe).await {
                warn!(error = %err, "network unreachable, using fallback grants only");
                self.close_session(session.as_mut()).await;
                return self.fallback_report(discovered_at, FallbackReason::NetworkUnreachable);
            }
        }

        let mut records = Vec::new();
        let mut outcomes = Vec::with_capacity(self.sources.len());
        for (index, source) in self.sources.iter().enumerate() {
            if index > 0 && !self.shutdown_requested() {
                self.politeness_pause().await;
            }
            if self.shutdown_requested() {
                info!(source = %source.name, "shutdown requested, skipping source");
                outcomes.push(SourceOutcome {
                    source_name: source.name.clone(),
                    status: SourceStatus::Skipped,
                });
                continue;
            }

            let source_span = info_span!("scrape_source", source = %source.name, url = %source.url);
            let status = match self
                .scrape_source(session.as_ref(), source, discovered_at)
                .instrument(source_span)
                .await
            {
                Ok((found, scraped)) => {
                    info!(source = %source.name, found, kept = scraped.len(), "source scraped");
                    let kept = scraped.len();
                    records.extend(scraped);
                    SourceStatus::Scraped { found, kept }
                }
                Err(err) => {
                    warn!(source = %source.name, error = %err, "source scrape failed, continuing");
                    SourceStatus::Failed {
                        error: err.to_string(),
                    }
                }
            };
            outcomes.push(SourceOutcome {
                source_name: source.name.clone(),
                status,
            });
        }

        self.close_session(session.as_mut()).await;

        let mut records = dedup_records(records);
        let mut fallback = None;
        if records.is_empty() {
            warn!("no grants scraped from any source, adding fallback grants");
            records.extend(fallback_grants(discovered_at));
            fallback = Some(FallbackReason::NoRecords);
        }

        let report = ScrapeReport {
            records,
            sources: outcomes,
            fallback,
            discovered_at,
        };
        log_summary(&report);
        report
    }

    async fn launch(&self) -> Result<Box<dyn BrowserSession>, ScrapeError> {
        let mut attempts = Vec::new();
        for profile in &self.config.launch_profiles {
            match bounded("browser launch", self.config.launch_timeout, self.launcher.launch(profile)).await {
                Ok(session) => {
                    info!(profile = %profile.name, "browser launched");
                    return Ok(session);
                }
                Err(err) => {
                    warn!(profile = %profile.name, error = %err, "browser launch failed");
                    attempts.push(format!("{}: {err}", profile.name));
                }
            }
        }
        if attempts.is_empty() {
            attempts.push("no launch profiles configured".to_string());
        }
        Err(ScrapeError::Initialization { attempts })
    }

    async fn check_connectivity(&self, session: &dyn BrowserSession, probe: &ConnectivityProbe) -> Result<(), ScrapeError> {
        let mut page = bounded("probe page", probe.timeout, session.new_page()).await?;
        let options = NavigateOptions {
            timeout: probe.timeout,
            settle: Duration::ZERO,
        };
        let result = async {
            bounded("connectivity probe", probe.timeout, page.navigate(&probe.url, &options)).await?;
            let body = bounded("connectivity probe", probe.timeout, page.content()).await?;
            if body.contains(&probe.marker) {
                Ok(())
            } else {
                Err(ScrapeError::Probe(format!(
                    "{} did not contain `{}`",
                    probe.url, probe.marker
                )))
            }
        }
        .await;
        close_page(page.as_mut(), probe.timeout).await;
        result?;
        info!(url = %probe.url, "network connectivity confirmed");
        Ok(())
    }

    /// Returns the number of containers found and the classified records kept.
    async fn scrape_source(
        &self,
        session: &dyn BrowserSession,
        source: &SourceConfig,
        discovered_at: DateTime<Utc>,
    ) -> Result<(usize, Vec<GrantRecord>), ScrapeError> {
        let step_timeout = self.config.extraction_timeout;
        let mut page = bounded("page open", step_timeout, session.new_page()).await?;

        let nav = self.config.navigation;
        let extracted = async {
            bounded("navigation", nav.timeout + nav.settle, page.navigate(&source.url, &nav)).await?;
            bounded("extraction", step_timeout, page.query_fields(&source.selectors)).await
        }
        .await;
        close_page(page.as_mut(), step_timeout).await;

        let tuples = extracted?;
        let found = tuples.len();
        let records = candidates_from_tuples(tuples, source, self.config.min_title_chars)
            .into_iter()
            .map(|candidate| classify(candidate, Origin::Scraped, discovered_at))
            .inspect(|record| {
                if record.due_date.is_unparsed() {
                    warn!(grant = %record.name, deadline = %record.due_date, "deadline text not recognised as a date");
                }
            })
            .collect();
        Ok((found, records))
    }

    async fn close_session(&self, session: &mut dyn BrowserSession) {
        match bounded("browser close", self.config.launch_timeout, session.close()).await {
            Ok(()) => info!("browser closed"),
            Err(err) => warn!(error = %err, "browser did not close cleanly"),
        }
    }

    fn fallback_report(&self, discovered_at: DateTime<Utc>, reason: FallbackReason) -> ScrapeReport {
        let report = ScrapeReport {
            records: fallback_grants(discovered_at),
            sources: self
                .sources
                .iter()
                .map(|s| SourceOutcome {
                    source_name: s.name.clone(),
                    status: SourceStatus::Skipped,
                })
                .collect(),
            fallback: Some(reason),
            discovered_at,
        };
        log_summary(&report);
        report
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    async fn politeness_pause(&self) {
        let delay = self.config.politeness_delay.max(MIN_POLITENESS_DELAY);
        let Some(mut rx) = self.shutdown.clone() else {
            tokio::time::sleep(delay).await;
            return;
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = async {
                let stopped = rx.wait_for(|stop| *stop).await.is_ok();
                if !stopped {
                    std::future::pending::<()>().await;
                }
            } => {}
        }
    }
}

async fn bounded<T, F>(stage: &'static str, after: Duration, fut: F) -> Result<T, ScrapeError>
where
    F: Future<Output = Result<T, ScrapeError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(ScrapeError::Timeout { stage, after }),
    }
}

async fn close_page(page: &mut dyn PageContext, after: Duration) {
    if let Err(err) = bounded("page close", after, page.close()).await {
        warn!(error = %err, "page context did not close cleanly");
    }
}

/// Drops tuples without a usable title and fills the display defaults for
/// missing optional fields.
pub fn candidates_from_tuples(
    tuples: Vec<FieldTuple>,
    source: &SourceConfig,
    min_title_chars: usize,
) -> Vec<CandidateRecord> {
    tuples
        .into_iter()
        .filter_map(|tuple| {
            let title = tuple.title?;
            if title.chars().count() < min_title_chars {
                return None;
            }
            Some(CandidateRecord {
                title,
                description: tuple.description.unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
                amount_text: tuple.amount.unwrap_or_else(|| DEFAULT_AMOUNT.to_string()),
                deadline_text: tuple.deadline.unwrap_or_else(|| DEFAULT_DEADLINE.to_string()),
                source_name: source.name.clone(),
                source_url: source.url.clone(),
            })
        })
        .collect()
}

/// Keeps the first record for each funder + normalized title.
pub fn dedup_records(records: Vec<GrantRecord>) -> Vec<GrantRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.dedup_key()))
        .collect()
}

fn log_summary(report: &ScrapeReport) {
    let count = |category: EligibilityCategory| {
        report
            .records
            .iter()
            .filter(|r| r.eligibility.category == category)
            .count()
    };
    let tags: BTreeSet<&str> = report
        .records
        .iter()
        .flat_map(|r| r.tags.iter().map(|t| t.label()))
        .collect();
    info!(
        total = report.records.len(),
        scraped = report.scraped_count(),
        eligible = count(EligibilityCategory::Eligible),
        potential = count(EligibilityCategory::Potential),
        fallback = ?report.fallback,
        tags = %tags.into_iter().collect::<Vec<_>>().join(", "),
        "grant discovery scrape complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    #[derive(Clone)]
    enum PageScript {
        Html(String),
        Hang,
        Fail,
    }

    #[derive(Default)]
    struct Counters {
        launches: AtomicUsize,
        opened: AtomicUsize,
        closed: AtomicUsize,
        sessions_closed: AtomicUsize,
    }

    struct FakeLauncher {
        working_profile: Option<usize>,
        pages: HashMap<String, PageScript>,
        counters: Arc<Counters>,
        navigations: Arc<Mutex<Vec<String>>>,
    }

    struct FakeSession {
        pages: HashMap<String, PageScript>,
        counters: Arc<Counters>,
        navigations: Arc<Mutex<Vec<String>>>,
    }

    struct FakePage {
        pages: HashMap<String, PageScript>,
        current: Option<PageScript>,
        counters: Arc<Counters>,
        navigations: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self, profile: &LaunchProfile) -> Result<Box<dyn BrowserSession>, ScrapeError> {
            let index = self.counters.launches.fetch_add(1, Ordering::SeqCst);
            if Some(index) != self.working_profile {
                return Err(ScrapeError::Initialization {
                    attempts: vec![format!("{} refused", profile.name)],
                });
            }
            Ok(Box::new(FakeSession {
                pages: self.pages.clone(),
                counters: self.counters.clone(),
                navigations: self.navigations.clone(),
            }))
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn new_page(&self) -> Result<Box<dyn PageContext>, ScrapeError> {
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakePage {
                pages: self.pages.clone(),
                current: None,
                counters: self.counters.clone(),
                navigations: self.navigations.clone(),
            }))
        }

        async fn close(&mut self) -> Result<(), ScrapeError> {
            self.counters.sessions_closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl PageContext for FakePage {
        async fn navigate(&mut self, url: &str, _options: &NavigateOptions) -> Result<(), ScrapeError> {
            self.navigations.lock().unwrap().push(url.to_string());
            match self.pages.get(url).cloned() {
                Some(PageScript::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
                Some(PageScript::Fail) | None => Err(ScrapeError::Navigation {
                    url: url.to_string(),
                    message: "net::ERR_NAME_NOT_RESOLVED".into(),
                }),
                Some(script) => {
                    self.current = Some(script);
                    Ok(())
                }
            }
        }

        async fn content(&mut self) -> Result<String, ScrapeError> {
            match &self.current {
                Some(PageScript::Html(html)) => Ok(html.clone()),
                _ => Err(ScrapeError::Extraction("no page loaded".into())),
            }
        }

        async fn close(&mut self) -> Result<(), ScrapeError> {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const PROBE_URL: &str = "https://probe.test/get";

    fn source(name: &str, url: &str) -> SourceConfig {
        SourceConfig {
            name: name.into(),
            url: url.into(),
            selectors: SourceSelectors {
                grant_items: ".grant".into(),
                title: "h3".into(),
                description: "p".into(),
                amount: ".amount".into(),
                deadline: ".deadline".into(),
            },
            enabled: true,
        }
    }

    fn listing(titles: &[&str]) -> PageScript {
        let items: String = titles
            .iter()
            .map(|t| format!(r#"<div class="grant"><h3>{t}</h3><p>Documentary film support</p><span class="deadline">01/09/2026</span></div>"#))
            .collect();
        PageScript::Html(format!("<html><body>{items}</body></html>"))
    }

    fn harness(
        working_profile: Option<usize>,
        pages: Vec<(&str, PageScript)>,
    ) -> (Arc<FakeLauncher>, Arc<Counters>, Arc<Mutex<Vec<String>>>) {
        let counters = Arc::new(Counters::default());
        let navigations = Arc::new(Mutex::new(Vec::new()));
        let mut pages: HashMap<String, PageScript> =
            pages.into_iter().map(|(u, p)| (u.to_string(), p)).collect();
        pages
            .entry(PROBE_URL.to_string())
            .or_insert_with(|| PageScript::Html("<pre>probe ok</pre>".into()));
        let launcher = Arc::new(FakeLauncher {
            working_profile,
            pages,
            counters: counters.clone(),
            navigations: navigations.clone(),
        });
        (launcher, counters, navigations)
    }

    fn config() -> ScraperConfig {
        ScraperConfig {
            probe: Some(ConnectivityProbe {
                url: PROBE_URL.into(),
                marker: "probe ok".into(),
                timeout: Duration::from_secs(10),
            }),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failing_source_does_not_stop_later_sources() {
        let (launcher, counters, navigations) = harness(
            Some(0),
            vec![
                ("https://a.test", PageScript::Fail),
                ("https://b.test", listing(&["Documentary Development", "Screen Production Fund"])),
            ],
        );
        let scraper = GrantScraper::new(
            launcher,
            vec![source("A", "https://a.test"), source("B", "https://b.test")],
            config(),
        );
        let report = scraper.scrape_all_sources().await;

        assert_eq!(report.records.len(), 2);
        assert!(report.fallback.is_none());
        assert!(report.records.iter().all(|r| r.source_name == "B"));
        assert!(matches!(report.sources[0].status, SourceStatus::Failed { .. }));
        assert_eq!(report.sources[1].status, SourceStatus::Scraped { found: 2, kept: 2 });
        assert_eq!(
            *navigations.lock().unwrap(),
            vec![PROBE_URL.to_string(), "https://a.test".into(), "https://b.test".into()]
        );
        // probe page + one page per source, all released
        assert_eq!(counters.opened.load(Ordering::SeqCst), 3);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 3);
        assert_eq!(counters.sessions_closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_navigation_times_out_and_releases_the_page() {
        let (launcher, counters, _) = harness(
            Some(0),
            vec![
                ("https://slow.test", PageScript::Hang),
                ("https://ok.test", listing(&["Regional Arts Fund", "Community Media Grant", "Documentary Lab"])),
            ],
        );
        let scraper = GrantScraper::new(
            launcher,
            vec![source("Slow", "https://slow.test"), source("Ok", "https://ok.test")],
            config(),
        );
        let report = scraper.scrape_all_sources().await;
        assert_eq!(report.records.len(), 3);
        match &report.sources[0].status {
            SourceStatus::Failed { error } => assert!(error.contains("timed out")),
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(counters.opened.load(Ordering::SeqCst), counters.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn second_launch_profile_is_tried() {
        let (launcher, counters, _) = harness(Some(1), vec![("https://a.test", listing(&["Documentary Development"]))]);
        let scraper = GrantScraper::new(launcher, vec![source("A", "https://a.test")], config());
        let report = scraper.scrape_all_sources().await;
        assert_eq!(counters.launches.load(Ordering::SeqCst), 2);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].origin, Origin::Scraped);
    }

    #[tokio::test(start_paused = true)]
    async fn browser_failure_yields_exactly_the_fallback_dataset() {
        let (launcher, counters, navigations) = harness(None, vec![]);
        let scraper = GrantScraper::new(launcher, vec![source("A", "https://a.test")], config());
        let report = scraper.scrape_all_sources().await;

        assert_eq!(counters.launches.load(Ordering::SeqCst), 2);
        assert_eq!(report.fallback, Some(FallbackReason::BrowserUnavailable));
        let expected = fallback_grants(report.discovered_at);
        assert_eq!(report.records, expected);
        assert!(navigations.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_yields_fallback_and_closes_browser() {
        let (launcher, counters, _) = harness(
            Some(0),
            vec![
                (PROBE_URL, PageScript::Html("captive portal".into())),
                ("https://a.test", listing(&["Documentary Development"])),
            ],
        );
        let scraper = GrantScraper::new(launcher, vec![source("A", "https://a.test")], config());
        let report = scraper.scrape_all_sources().await;
        assert_eq!(report.fallback, Some(FallbackReason::NetworkUnreachable));
        assert!(report.records.iter().all(|r| r.origin == Origin::Fallback));
        assert_eq!(counters.sessions_closed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.opened.load(Ordering::SeqCst), counters.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_run_appends_fallback() {
        let (launcher, _, _) = harness(Some(0), vec![("https://a.test", listing(&["Tiny"]))]);
        let scraper = GrantScraper::new(launcher, vec![source("A", "https://a.test")], config());
        let report = scraper.scrape_all_sources().await;
        assert_eq!(report.sources[0].status, SourceStatus::Scraped { found: 1, kept: 0 });
        assert_eq!(report.fallback, Some(FallbackReason::NoRecords));
        assert_eq!(report.records.len(), fallback_grants(report.discovered_at).len());
    }

    #[tokio::test(start_paused = true)]
    async fn politeness_delay_separates_navigations() {
        let (launcher, _, _) = harness(
            Some(0),
            vec![
                ("https://a.test", listing(&["Documentary Development"])),
                ("https://b.test", listing(&["Screen Production Fund"])),
                ("https://c.test", listing(&["Regional Arts Fund"])),
            ],
        );
        let mut cfg = config();
        cfg.politeness_delay = Duration::from_millis(10);
        cfg.navigation.settle = Duration::ZERO;
        let scraper = GrantScraper::new(
            launcher,
            vec![
                source("A", "https://a.test"),
                source("B", "https://b.test"),
                source("C", "https://c.test"),
            ],
            cfg,
        );
        let started = tokio::time::Instant::now();
        let report = scraper.scrape_all_sources().await;
        assert_eq!(report.records.len(), 3);
        // two gaps, each clamped up to the one second minimum
        assert!(started.elapsed() >= Duration::from_secs(2));
        let names: Vec<_> = report.records.iter().map(|r| r.source_name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_skips_remaining_sources() {
        let (launcher, _, navigations) = harness(
            Some(0),
            vec![
                ("https://a.test", listing(&["Documentary Development"])),
                ("https://b.test", listing(&["Screen Production Fund"])),
            ],
        );
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let scraper = GrantScraper::new(
            launcher,
            vec![source("A", "https://a.test"), source("B", "https://b.test")],
            config(),
        )
        .with_shutdown(rx);
        let report = scraper.scrape_all_sources().await;
        assert!(report.sources.iter().all(|s| s.status == SourceStatus::Skipped));
        assert_eq!(*navigations.lock().unwrap(), vec![PROBE_URL.to_string()]);
    }

    #[test]
    fn short_or_missing_titles_are_noise() {
        let tuples = vec![
            FieldTuple {
                title: Some("Grant".into()),
                ..Default::default()
            },
            FieldTuple::default(),
            FieldTuple {
                title: Some("Arts Projects".into()),
                ..Default::default()
            },
        ];
        let candidates = candidates_from_tuples(tuples, &source("A", "https://a.test"), 6);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Arts Projects");
        assert_eq!(candidates[0].description, "No description available");
        assert_eq!(candidates[0].amount_text, "Contact for details");
        assert_eq!(candidates[0].deadline_text, "Ongoing");
    }

    #[test]
    fn duplicates_within_a_run_keep_the_first() {
        let now = Utc::now();
        let mut records = fallback_grants(now);
        let mut dup = records[0].clone();
        dup.name = dup.name.to_uppercase();
        dup.description = "later copy".into();
        records.push(dup);
        let deduped = dedup_records(records);
        assert_eq!(deduped.len(), 2);
        assert_ne!(deduped[0].description, "later copy");
    }
}
