use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rental_scout::config::{read_url_list, CrawlerConfig, FetchBackend};
use rental_scout::scrapers::{BrowserFetcher, HttpFetcher, PageFetcher, RateLimiter};
use rental_scout::{Crawler, FeatureClassifier, KeywordConfig};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Full,
    Mini,
}

impl Mode {
    fn as_str(&self) -> &'static str {
        match self {
            Mode::Full => "full",
            Mode::Mini => "mini",
        }
    }
}

#[derive(Parser)]
#[command(name = "rental-scout")]
#[command(about = "Harvest rental listings into CSV batches")]
struct Cli {
    /// Run mode; selects config/crawler_config_{mode}.yaml
    #[arg(long, value_enum, default_value = "full")]
    mode: Mode,

    /// Config file, overrides --mode
    #[arg(long)]
    config: Option<PathBuf>,

    /// URL list file, overrides the configured one
    #[arg(long)]
    urls: Option<PathBuf>,

    /// Continue searches from the progress checkpoint
    #[arg(long)]
    resume: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rental_scout=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(|| {
        PathBuf::from(format!("config/crawler_config_{}.yaml", cli.mode.as_str()))
    });
    info!("Loading config from {}", config_path.display());
    let mut config = CrawlerConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    if cli.resume {
        config.resume = true;
    }

    let url_file = cli.urls.clone().unwrap_or_else(|| config.paths.url_file.clone());
    let urls = read_url_list(&url_file)
        .with_context(|| format!("Failed to read URL list {}", url_file.display()))?;
    if urls.is_empty() {
        error!("No URLs in {}", url_file.display());
        std::process::exit(1);
    }

    let keywords = KeywordConfig::load(
        &config.paths.features_config,
        &config.paths.furniture_keywords,
        &config.paths.aircon_keywords,
    );
    let classifier = Arc::new(FeatureClassifier::new(keywords));

    let limiter = RateLimiter::from_config(&config.performance);
    let fetcher: Arc<dyn PageFetcher> = match config.network.backend {
        FetchBackend::Http => Arc::new(HttpFetcher::new(&config.network, limiter)?),
        FetchBackend::Browser => Arc::new(BrowserFetcher::new(&config.network, limiter)?),
    };
    info!(
        "Fetching with the {} backend, {} URLs queued",
        fetcher.backend_name(),
        urls.len()
    );

    let crawler = Crawler::new(&config, fetcher, classifier).context("Failed to build crawler")?;
    let summary = crawler.run(&urls).await;

    if summary.unwritten_rows > 0 {
        error!("{} rows could not be written", summary.unwritten_rows);
    }
    if summary.artifacts.is_empty() {
        error!("No output files were written");
        std::process::exit(1);
    }

    for path in &summary.artifacts {
        println!("{}", path.display());
    }
    Ok(())
}
