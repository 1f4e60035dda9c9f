use async_trait::async_trait;

use crate::error::FetchError;

/// Common trait for all page fetchers.
/// The paginator and detail extractor only ever see this, so an HTTP client,
/// a headless browser or a canned test double can sit behind it.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a page body, honouring rate limits and retries.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;

    /// Get the name of the fetch backend
    fn backend_name(&self) -> &'static str;
}
