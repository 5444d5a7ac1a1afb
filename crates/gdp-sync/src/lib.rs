//! Discovery orchestration: scheduler, store reconciliation, and the
//! pipeline wiring used by the CLI.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use gdp_scraper::{GrantScraper, SourceRegistry, WebDriverLauncher};
use gdp_storage::{HttpGrantStore, StateStore};
use tokio::sync::watch;
use tracing::info;

pub mod config;
pub mod integration;
pub mod scheduler;

pub use config::PipelineConfig;
pub use integration::{DiscoveryRun, Integration, Section, StoreHealth, SystemStatus};
pub use scheduler::{load_run_stats, Cadence, DiscoveryJob, DiscoveryScheduler, RunOutcome, RunSlot, SchedulerSnapshot};

pub const CRATE_NAME: &str = "gdp-sync";

/// Scraper plus integration layer; one `run_once` is one full discovery.
pub struct Pipeline {
    scraper: GrantScraper,
    integration: Arc<Integration>,
}

impl Pipeline {
    pub fn new(scraper: GrantScraper, integration: Arc<Integration>) -> Self {
        Self { scraper, integration }
    }

    /// Wires the WebDriver launcher, source registry, and HTTP grant store.
    pub async fn from_config(config: &PipelineConfig, shutdown: watch::Receiver<bool>) -> Result<Self> {
        let registry = SourceRegistry::load_or_builtin(&config.sources_file)
            .await
            .with_context(|| format!("loading sources from {}", config.sources_file.display()))?;
        let sources = registry.enabled();
        info!(sources = sources.len(), "source registry loaded");

        let launcher = Arc::new(WebDriverLauncher::new(
            config.webdriver_url.clone(),
            Some(config.user_agent.clone()),
        ));
        let scraper = GrantScraper::new(launcher, sources, config.scraper_config()).with_shutdown(shutdown);

        let integration = Arc::new(Self::integration(config)?);
        integration
            .initialize()
            .await
            .context("initializing state directory")?;
        Ok(Self::new(scraper, integration))
    }

    /// The integration layer alone, for commands that never scrape.
    pub fn integration(config: &PipelineConfig) -> Result<Integration> {
        let store = HttpGrantStore::new(config.store_config()).context("building grant store client")?;
        Ok(Integration::new(Arc::new(store), StateStore::new(&config.state_dir)))
    }

    pub fn integration_handle(&self) -> Arc<Integration> {
        self.integration.clone()
    }

    pub async fn discover(&self) -> Result<DiscoveryRun> {
        self.integration.run_full_discovery(&self.scraper).await
    }
}

#[async_trait]
impl DiscoveryJob for Pipeline {
    async fn run_once(&self) -> Result<usize> {
        let run = self.discover().await?;
        Ok(run.report.records.len())
    }
}
