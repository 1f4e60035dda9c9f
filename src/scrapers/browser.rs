use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::error::{AttemptError, FetchError};
use crate::scrapers::fetch::{validate_url, with_retry, RateLimiter, RetryPolicy};
use crate::scrapers::traits::PageFetcher;

/// Per-tab settings taken from the network config.
#[derive(Debug, Clone)]
struct TabSetup {
    timeout: Duration,
    settle: Duration,
    user_agent: String,
    headers: BTreeMap<String, String>,
}

impl TabSetup {
    fn from_config(network: &NetworkConfig) -> Self {
        Self {
            timeout: network.timeout(),
            settle: network.settle(),
            user_agent: network.user_agent.clone(),
            headers: network.headers.clone(),
        }
    }
}

/// Browser-based fetcher using headless Chrome, for pages that only render
/// their listing data client-side.
pub struct BrowserFetcher {
    browser: Browser,
    limiter: RateLimiter,
    policy: RetryPolicy,
    setup: TabSetup,
}

impl BrowserFetcher {
    /// Launch headless Chrome
    pub fn new(network: &NetworkConfig, limiter: RateLimiter) -> Result<Self> {
        info!("Launching headless Chrome...");

        let options = LaunchOptions::default_builder()
            .headless(true)
            .build()
            .context("Failed to build launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome browser")?;

        Ok(Self {
            browser,
            limiter,
            policy: RetryPolicy::from_config(network),
            setup: TabSetup::from_config(network),
        })
    }

    async fn attempt(&self, url: &str) -> Result<String, AttemptError> {
        let browser = self.browser.clone();
        let setup = self.setup.clone();
        let target = url.to_string();

        tokio::task::spawn_blocking(move || render_page(&browser, &target, &setup))
            .await
            .map_err(|e| AttemptError::Browser(e.to_string()))?
    }
}

fn browser_err(e: anyhow::Error) -> AttemptError {
    AttemptError::Browser(e.to_string())
}

/// Renders `url` in a fresh tab. The tab is closed on every path.
fn render_page(browser: &Browser, url: &str, setup: &TabSetup) -> Result<String, AttemptError> {
    let tab = browser.new_tab().map_err(browser_err)?;
    let rendered = load_and_read(&tab, url, setup);
    let html = then_close(url, rendered, || tab.close(true))?;

    if html.trim().is_empty() {
        return Err(AttemptError::EmptyBody);
    }
    debug!("Rendered {} bytes from {}", html.len(), url);
    Ok(html)
}

fn load_and_read(tab: &Tab, url: &str, setup: &TabSetup) -> Result<String, AttemptError> {
    tab.set_default_timeout(setup.timeout);
    tab.set_user_agent(&setup.user_agent, None, None)
        .map_err(browser_err)?;
    if !setup.headers.is_empty() {
        let headers: HashMap<&str, &str> = setup
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        tab.set_extra_http_headers(headers).map_err(browser_err)?;
    }

    tab.navigate_to(url).map_err(browser_err)?;
    tab.wait_until_navigated().map_err(browser_err)?;

    // Give client-side rendering a moment to populate the page
    if !setup.settle.is_zero() {
        std::thread::sleep(setup.settle);
    }

    Ok(tab
        .evaluate("document.documentElement.outerHTML", false)
        .map_err(browser_err)?
        .value
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default())
}

/// Runs `close` and hands back `result` unchanged; a failed close is logged.
fn then_close<T, E: fmt::Display>(
    url: &str,
    result: Result<T, AttemptError>,
    close: impl FnOnce() -> Result<bool, E>,
) -> Result<T, AttemptError> {
    if let Err(e) = close() {
        warn!("Could not close tab for {}: {}", url, e);
    }
    result
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        validate_url(url)?;
        with_retry(url, &self.limiter, self.policy, || self.attempt(url)).await
    }

    fn backend_name(&self) -> &'static str {
        "browser"
    }
}
