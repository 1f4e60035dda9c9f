//! Error types for fetching, extraction, output and configuration.

use std::path::PathBuf;

use thiserror::Error;

/// A single failed request attempt. Every variant is retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttemptError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("empty response body")]
    EmptyBody,
    #[error("unexpected content type {0:?}")]
    ContentType(String),
    #[error("browser error: {0}")]
    Browser(String),
}

/// Errors returned by a [`crate::scrapers::PageFetcher`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// The URL can never be fetched; no request was attempted.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    /// Retries exhausted; the target may succeed on a later run.
    #[error("fetch failed for {url} after {attempts} attempts: {last}")]
    FetchFailed {
        url: String,
        attempts: u32,
        last: AttemptError,
    },
}

/// Errors from turning a detail page into a listing record.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("missing structured payload: {0}")]
    MissingPayload(String),
    #[error("malformed structured payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid selector {0}")]
    Selector(String),
}

/// Errors from writing an output artifact. Buffered rows survive all of these.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("io error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },
}

/// Non-fatal sanity check failure on an extracted record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationWarning {
    #[error("missing listing id")]
    MissingId,
    #[error("missing property url")]
    MissingUrl,
    #[error("{field} is negative ({value})")]
    Negative { field: &'static str, value: f64 },
    #[error("latitude {0} out of range")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} out of range")]
    LongitudeOutOfRange(f64),
}
