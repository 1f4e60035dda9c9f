//! Rental listing harvester: paginated search discovery, detail extraction
//! with fallback chains, keyword-driven feature classification and batched
//! CSV output.

pub mod config;
pub mod crawler;
pub mod error;
pub mod features;
pub mod models;
pub mod output;
pub mod progress;
pub mod scrapers;

pub use config::CrawlerConfig;
pub use crawler::{Crawler, RunSummary, UnitReport};
pub use error::{ExtractError, FetchError, WriteError};
pub use features::{FeatureClassifier, KeywordConfig};
pub use models::{FeatureSet, ListingRecord};
pub use output::{BatchWriter, FlushOutcome};
