//! `BrowserLauncher` backed by a WebDriver endpoint (chromedriver).

use async_trait::async_trait;
use thirtyfour::prelude::*;
use thirtyfour::WindowHandle;
use tracing::{debug, warn};

use crate::browser::{BrowserLauncher, BrowserSession, LaunchProfile, NavigateOptions, PageContext, ScrapeError};

pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

#[derive(Debug, Clone)]
pub struct WebDriverLauncher {
    server_url: String,
    user_agent: Option<String>,
}

impl WebDriverLauncher {
    pub fn new(server_url: impl Into<String>, user_agent: Option<String>) -> Self {
        Self {
            server_url: server_url.into(),
            user_agent,
        }
    }

    /// Command-line switches sent to Chrome under `goog:chromeOptions.args`.
    pub fn chrome_args(&self, profile: &LaunchProfile) -> Vec<String> {
        let mut args = profile.args.clone();
        if let Some(user_agent) = &self.user_agent {
            args.push(format!("--user-agent={user_agent}"));
        }
        args
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Box<dyn BrowserSession>, ScrapeError> {
        let init_err = |e: WebDriverError| ScrapeError::Initialization {
            attempts: vec![format!("{}: {e}", profile.name)],
        };

        let mut caps = DesiredCapabilities::chrome();
        caps.add_chrome_option("args", self.chrome_args(profile))
            .map_err(init_err)?;

        let driver = WebDriver::new(&self.server_url, caps).await.map_err(init_err)?;
        let home = match driver.window().await {
            Ok(handle) => handle,
            Err(e) => {
                let _ = driver.quit().await;
                return Err(init_err(e));
            }
        };
        debug!(profile = %profile.name, server = %self.server_url, "webdriver session started");
        Ok(Box::new(WebDriverSession {
            driver: Some(driver),
            home,
        }))
    }
}

struct WebDriverSession {
    driver: Option<WebDriver>,
    home: WindowHandle,
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn new_page(&self) -> Result<Box<dyn PageContext>, ScrapeError> {
        let driver = self
            .driver
            .as_ref()
            .ok_or_else(|| ScrapeError::Extraction("browser session already closed".into()))?
            .clone();
        let handle = driver
            .new_tab()
            .await
            .map_err(|e| ScrapeError::Extraction(format!("opening tab: {e}")))?;
        Ok(Box::new(WebDriverPage {
            driver,
            handle: Some(handle),
            home: self.home.clone(),
        }))
    }

    async fn close(&mut self) -> Result<(), ScrapeError> {
        if let Some(driver) = self.driver.take() {
            driver
                .quit()
                .await
                .map_err(|e| ScrapeError::Extraction(format!("quitting browser: {e}")))?;
        }
        Ok(())
    }
}

/// One browser tab. Pages of a session are used one at a time.
struct WebDriverPage {
    driver: WebDriver,
    handle: Option<WindowHandle>,
    home: WindowHandle,
}

impl WebDriverPage {
    async fn focus(&self) -> Result<(), ScrapeError> {
        let handle = self
            .handle
            .clone()
            .ok_or_else(|| ScrapeError::Extraction("page already closed".into()))?;
        self.driver
            .switch_to_window(handle)
            .await
            .map_err(|e| ScrapeError::Extraction(format!("switching tab: {e}")))
    }
}

#[async_trait]
impl PageContext for WebDriverPage {
    async fn navigate(&mut self, url: &str, options: &NavigateOptions) -> Result<(), ScrapeError> {
        self.focus().await?;
        let load = self.driver.goto(url);
        match tokio::time::timeout(options.timeout, load).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(ScrapeError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ScrapeError::Timeout {
                    stage: "navigation",
                    after: options.timeout,
                })
            }
        }
        if !options.settle.is_zero() {
            tokio::time::sleep(options.settle).await;
        }
        Ok(())
    }

    async fn content(&mut self) -> Result<String, ScrapeError> {
        self.focus().await?;
        self.driver
            .source()
            .await
            .map_err(|e| ScrapeError::Extraction(format!("reading page source: {e}")))
    }

    async fn close(&mut self) -> Result<(), ScrapeError> {
        if self.handle.is_none() {
            return Ok(());
        }
        self.focus().await?;
        self.handle = None;
        let closed = self.driver.close_window().await;
        if let Err(e) = self.driver.switch_to_window(self.home.clone()).await {
            warn!(error = %e, "could not return to the home tab");
        }
        closed.map_err(|e| ScrapeError::Extraction(format!("closing tab: {e}")))
    }
}
