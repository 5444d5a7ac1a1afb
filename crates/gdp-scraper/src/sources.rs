//! Typed source registry, validated when it is loaded.

use std::collections::HashSet;
use std::path::Path;

use scraper::Selector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing source registry: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("source `{source_name}`: {message}")]
    Invalid { source_name: String, message: String },
}

/// CSS selectors describing where grant fields live on a source page.
/// `grant_items` matches one container per grant; the others are evaluated
/// inside each container and the first hit wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSelectors {
    pub grant_items: String,
    pub title: String,
    pub description: String,
    pub amount: String,
    pub deadline: String,
}

impl SourceSelectors {
    fn named(&self) -> [(&'static str, &str); 5] {
        [
            ("grant_items", &self.grant_items),
            ("title", &self.title),
            ("description", &self.description),
            ("amount", &self.amount),
            ("deadline", &self.deadline),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    pub selectors: SourceSelectors,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), SourceConfigError> {
        let invalid = |message: String| SourceConfigError::Invalid {
            source_name: self.name.clone(),
            message,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".into()));
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(invalid(format!("url `{}` is not http(s)", self.url)));
        }
        for (field, selector) in self.selectors.named() {
            if selector.trim().is_empty() {
                return Err(invalid(format!("selector `{field}` must not be empty")));
            }
            Selector::parse(selector)
                .map_err(|e| invalid(format!("selector `{field}` = `{selector}`: {e}")))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub fn from_yaml_str(text: &str) -> Result<Self, SourceConfigError> {
        let registry: SourceRegistry = serde_yaml::from_str(text)?;
        registry.validate()?;
        Ok(registry)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SourceConfigError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SourceConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_yaml_str(&text)
    }

    /// Loads the registry file, or the built-in sources when there is no file.
    pub async fn load_or_builtin(path: impl AsRef<Path>) -> Result<Self, SourceConfigError> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            Ok(Self::builtin())
        }
    }

    pub fn validate(&self) -> Result<(), SourceConfigError> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !seen.insert(source.name.as_str()) {
                return Err(SourceConfigError::Invalid {
                    source_name: source.name.clone(),
                    message: "duplicate source name".into(),
                });
            }
        }
        Ok(())
    }

    pub fn enabled(&self) -> Vec<SourceConfig> {
        self.sources.iter().filter(|s| s.enabled).cloned().collect()
    }

    pub fn builtin() -> Self {
        Self {
            sources: vec![
                SourceConfig {
                    name: "Screen Australia".into(),
                    url: "https://www.screenaustralia.gov.au/funding-and-support".into(),
                    selectors: SourceSelectors {
                        grant_items: ".funding-item, .program-item, .grant-item".into(),
                        title: "h3, h2, .title".into(),
                        description: ".description, .summary, p".into(),
                        amount: ".amount, .funding-amount".into(),
                        deadline: ".deadline, .closing-date, .due-date".into(),
                    },
                    enabled: true,
                },
                SourceConfig {
                    name: "Australia Council for the Arts".into(),
                    url: "https://australiacouncil.gov.au/grants-and-funding".into(),
                    selectors: SourceSelectors {
                        grant_items: ".grant-card, .funding-opportunity, .program-card".into(),
                        title: "h3, h2, .card-title".into(),
                        description: ".card-description, .summary, p".into(),
                        amount: ".amount, .funding-range".into(),
                        deadline: ".deadline, .closing-date".into(),
                    },
                    enabled: true,
                },
            ],
        }
    }
}
