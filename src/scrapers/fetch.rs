//! Rate-limited HTTP fetching with bounded, jittered retries.

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};
use url::Url;

use crate::config::{NetworkConfig, PerformanceConfig};
use crate::error::{AttemptError, FetchError};
use crate::scrapers::traits::PageFetcher;

/// Spaces consecutive requests at least `1 / rate` apart, plus random jitter.
///
/// The last-request timestamp sits behind a tokio Mutex that is held across
/// the wait, so concurrent callers queue up instead of firing together.
pub struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
    jitter_factor: f64,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, jitter_factor: f64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
            jitter_factor: jitter_factor.max(0.0),
        }
    }

    /// A limiter for `requests_per_second`; zero or less disables spacing.
    pub fn per_second(requests_per_second: f64, jitter_factor: f64) -> Self {
        let min_interval = if requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self::new(min_interval, jitter_factor)
    }

    pub fn from_config(performance: &PerformanceConfig) -> Self {
        Self::per_second(
            performance.requests_per_second,
            performance.random_delay_factor,
        )
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO, 0.0)
    }

    fn spacing(&self) -> Duration {
        if self.min_interval.is_zero() || self.jitter_factor == 0.0 {
            return self.min_interval;
        }
        let max_jitter = self.min_interval.as_secs_f64() * self.jitter_factor;
        let jitter = rand::thread_rng().gen_range(0.0..=max_jitter);
        self.min_interval + Duration::from_secs_f64(jitter)
    }

    /// Wait until the next request may go out, then record it.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.spacing();
            let now = Instant::now();
            if ready_at > now {
                sleep(ready_at - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Bounded exponential backoff: `base * 2^attempt` between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
        }
    }

    pub fn from_config(network: &NetworkConfig) -> Self {
        Self::new(network.max_retries, network.base_backoff())
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt)
    }
}

/// Runs `operation` until it succeeds or the policy is exhausted, acquiring
/// the rate limiter before every attempt.
pub async fn with_retry<F, Fut>(
    url: &str,
    limiter: &RateLimiter,
    policy: RetryPolicy,
    operation: F,
) -> Result<String, FetchError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<String, AttemptError>>,
{
    let mut attempt = 0;
    loop {
        limiter.acquire().await;

        match operation().await {
            Ok(body) => return Ok(body),
            Err(err) if attempt < policy.max_retries => {
                let wait = policy.backoff(attempt);
                warn!(
                    "Request failed ({}/{}), retrying {} in {:.1}s: {}",
                    attempt + 1,
                    policy.max_retries + 1,
                    url,
                    wait.as_secs_f64(),
                    err
                );
                sleep(wait).await;
                attempt += 1;
            }
            Err(err) => {
                error!(
                    "Giving up on {} after {} attempts: {}",
                    url,
                    attempt + 1,
                    err
                );
                return Err(FetchError::FetchFailed {
                    url: url.to_string(),
                    attempts: attempt + 1,
                    last: err,
                });
            }
        }
    }
}

/// Checks that a URL is worth requesting at all.
pub fn validate_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {}", other),
        }),
    }
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: Client,
    limiter: RateLimiter,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(network: &NetworkConfig, limiter: RateLimiter) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9"),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-AU,en;q=0.9"),
        );
        for (name, value) in &network.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name {}", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header {}", name))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(network.timeout())
            .user_agent(network.user_agent.clone())
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            limiter,
            policy: RetryPolicy::from_config(network),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn attempt(&self, url: &str) -> Result<String, AttemptError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !(content_type.contains("text/html") || content_type.contains("application/json")) {
            return Err(AttemptError::ContentType(content_type));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;
        if body.trim().is_empty() {
            return Err(AttemptError::EmptyBody);
        }

        debug!("Downloaded {} bytes from {}", body.len(), url);
        Ok(body)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        validate_url(url)?;
        with_retry(url, &self.limiter, self.policy, || self.attempt(url)).await
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn limiter_spaces_requests() {
        let limiter = RateLimiter::per_second(2.0, 0.0);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn first_request_is_not_delayed() {
        let limiter = RateLimiter::per_second(0.1, 0.5);
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn jitter_is_bounded() {
        let limiter = RateLimiter::per_second(1.0, 0.5);
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(1));
        assert!(waited <= Duration::from_millis(1501));
    }

    #[tokio::test(start_paused = true)]
    async fn shared_limiter_serialises_concurrent_callers() {
        let limiter = Arc::new(RateLimiter::per_second(1.0, 0.0));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[test]
    fn zero_rate_disables_spacing() {
        assert_eq!(RateLimiter::per_second(0.0, 0.5).spacing(), Duration::ZERO);
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_after_transient_failures() {
        let limiter = RateLimiter::unlimited();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(
            "https://example.com",
            &limiter,
            RetryPolicy::new(3, Duration::from_millis(100)),
            move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AttemptError::Status(503))
                } else {
                    Ok("<html></html>".to_string())
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "<html></html>");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_is_typed() {
        let limiter = RateLimiter::unlimited();
        let start = Instant::now();
        let result = with_retry(
            "https://example.com/x",
            &limiter,
            RetryPolicy::new(2, Duration::from_millis(100)),
            || async { Err(AttemptError::EmptyBody) },
        )
        .await;

        match result {
            Err(FetchError::FetchFailed {
                url,
                attempts,
                last,
            }) => {
                assert_eq!(url, "https://example.com/x");
                assert_eq!(attempts, 3);
                assert_eq!(last, AttemptError::EmptyBody);
            }
            other => panic!("unexpected {other:?}"),
        }
        // 100ms + 200ms of backoff
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn invalid_urls_are_rejected_up_front() {
        assert!(matches!(
            validate_url("not a url"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(matches!(
            validate_url("ftp://example.com/file"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(validate_url("https://www.domain.com.au/rent/").is_ok());
    }
}
