//! Crawler configuration, loaded from YAML.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::scrapers::types::DelayRange;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub network: NetworkConfig,
    pub performance: PerformanceConfig,
    pub site: SiteConfig,
    pub features: ExtractionConfig,
    pub output: OutputConfig,
    pub paths: PathsConfig,
    /// Continue search URLs from the progress checkpoint.
    pub resume: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FetchBackend {
    #[default]
    Http,
    Browser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Per-request timeout in seconds.
    pub timeout: u64,
    pub max_retries: u32,
    /// Base backoff in seconds, doubled per attempt.
    pub backoff_factor: f64,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    pub backend: FetchBackend,
    /// Browser backend only: seconds to let client-side rendering finish.
    pub settle_secs: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: 20,
            max_retries: 3,
            backoff_factor: 0.5,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: BTreeMap::new(),
            backend: FetchBackend::Http,
            settle_secs: 2.0,
        }
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs_f64(self.settle_secs.max(0.0))
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_factor.max(0.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Zero or negative disables request spacing.
    pub requests_per_second: f64,
    /// Jitter ceiling as a fraction of the base spacing.
    pub random_delay_factor: f64,
    /// A page with fewer links than this is the last page.
    pub results_per_page_threshold: usize,
    pub max_pages: Option<u32>,
    pub delay_min: f64,
    pub delay_max: f64,
    pub page_delay_min: f64,
    pub page_delay_max: f64,
    pub inter_url_delay_min: f64,
    pub inter_url_delay_max: f64,
    /// Stop issuing new fetches after this many seconds.
    pub max_run_time_secs: Option<u64>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 1.5,
            random_delay_factor: 0.5,
            results_per_page_threshold: 10,
            max_pages: None,
            delay_min: 0.8,
            delay_max: 2.2,
            page_delay_min: 2.0,
            page_delay_max: 3.5,
            inter_url_delay_min: 3.0,
            inter_url_delay_max: 7.0,
            max_run_time_secs: None,
        }
    }
}

impl PerformanceConfig {
    pub fn listing_delay(&self) -> DelayRange {
        DelayRange::new(self.delay_min, self.delay_max)
    }

    pub fn page_delay(&self) -> DelayRange {
        DelayRange::new(self.page_delay_min, self.page_delay_max)
    }

    pub fn inter_url_delay(&self) -> DelayRange {
        DelayRange::new(self.inter_url_delay_min, self.inter_url_delay_max)
    }

    /// Zero spacing, zero delays. Used by tests and dry runs.
    pub fn unthrottled() -> Self {
        Self {
            requests_per_second: 0.0,
            random_delay_factor: 0.0,
            delay_min: 0.0,
            delay_max: 0.0,
            page_delay_min: 0.0,
            page_delay_max: 0.0,
            inter_url_delay_min: 0.0,
            inter_url_delay_max: 0.0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Scheme and host every listing link must start with.
    pub base_url: String,
    /// Path segment marking a URL as a paginated search.
    pub search_path_marker: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.domain.com.au".to_string(),
            search_path_marker: "/rent/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub enable_data_validation: bool,
    pub preserve_description_format: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enable_data_validation: true,
            preserve_description_format: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Full,
    Minimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub mode: OutputMode,
    pub minimal_columns: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            mode: OutputMode::Full,
            minimal_columns: Vec::new(),
        }
    }
}

impl OutputConfig {
    /// Columns to keep, or `None` to keep everything.
    pub fn column_filter(&self) -> Option<Vec<String>> {
        match self.mode {
            OutputMode::Minimal if !self.minimal_columns.is_empty() => {
                Some(self.minimal_columns.clone())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub url_file: PathBuf,
    pub features_config: PathBuf,
    pub furniture_keywords: PathBuf,
    pub aircon_keywords: PathBuf,
    pub progress_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            url_file: PathBuf::from("config/url.txt"),
            features_config: PathBuf::from("config/features_config.yaml"),
            furniture_keywords: PathBuf::from("config/furniture_keywords.yaml"),
            aircon_keywords: PathBuf::from("config/aircon_keywords.yaml"),
            progress_file: PathBuf::from("progress.json"),
        }
    }
}

impl CrawlerConfig {
    /// Parses a YAML config file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yml::from_str(text)
    }

    /// Like [`Self::from_path`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_path(path)
    }
}

/// Reads a URL list: one URL per line, blank lines and `#` comments skipped.
pub fn read_url_list(path: &Path) -> Result<Vec<String>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_url_list(&text))
}

pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
