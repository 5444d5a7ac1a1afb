//! Pipeline settings read from the environment, with defaults for local runs.

use std::path::PathBuf;
use std::time::Duration;

use gdp_scraper::{ConnectivityProbe, ScraperConfig, DEFAULT_WEBDRIVER_URL};
use gdp_storage::GrantStoreConfig;

/// Process-wide settings, read from `GDP_*` environment variables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub api_base_url: String,
    pub state_dir: PathBuf,
    pub sources_file: PathBuf,
    pub webdriver_url: String,
    pub navigation_timeout: Duration,
    /// `None` disables the connectivity probe (`GDP_PROBE_URL=off`).
    pub probe_url: Option<String>,
    pub politeness_delay: Duration,
    pub store_timeout: Duration,
    pub user_agent: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(default))
        };
        Self {
            api_base_url: lookup("GDP_API_BASE_URL").unwrap_or_else(|| "http://localhost:3001".to_string()),
            state_dir: lookup("GDP_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./state")),
            sources_file: lookup("GDP_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./sources.yaml")),
            webdriver_url: lookup("GDP_WEBDRIVER_URL").unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string()),
            navigation_timeout: secs("GDP_NAV_TIMEOUT_SECS", 30),
            probe_url: match lookup("GDP_PROBE_URL") {
                Some(v) if matches!(v.as_str(), "off" | "none" | "") => None,
                Some(v) => Some(v),
                None => Some(ConnectivityProbe::default().url),
            },
            politeness_delay: lookup("GDP_POLITENESS_DELAY_MS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_secs(2)),
            store_timeout: secs("GDP_STORE_TIMEOUT_SECS", 10),
            user_agent: lookup("GDP_USER_AGENT").unwrap_or_else(|| "gdp-bot/0.1".to_string()),
        }
    }

    pub fn scraper_config(&self) -> ScraperConfig {
        let defaults = ScraperConfig::default();
        let probe = self.probe_url.as_ref().map(|url| {
            let default_probe = ConnectivityProbe::default();
            // a custom probe page only has to load; the marker is specific to httpbin
            let marker = if *url == default_probe.url {
                default_probe.marker
            } else {
                String::new()
            };
            ConnectivityProbe {
                url: url.clone(),
                marker,
                timeout: default_probe.timeout,
            }
        });
        ScraperConfig {
            navigation: gdp_scraper::NavigateOptions {
                timeout: self.navigation_timeout,
                ..defaults.navigation
            },
            probe,
            politeness_delay: self.politeness_delay,
            ..defaults
        }
    }

    pub fn store_config(&self) -> GrantStoreConfig {
        GrantStoreConfig {
            base_url: self.api_base_url.clone(),
            request_timeout: self.store_timeout,
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }
}
