//! HTTP client for crawling with rate limiting and cancellation support.
//!
//! Outbound requests carry a browser-like user agent, are throttled through a
//! local rate limiter out of respect for the upstream hosts, and observe the
//! caller's cancellation signal at every suspension point.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::{EtlError, EtlResult};
use crate::infrastructure::config::CrawlConfig;

/// HTTP client configuration for crawling.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        let crawl = CrawlConfig::default();
        Self {
            user_agent: crawl.user_agent,
            timeout_seconds: crawl.http_timeout_seconds,
            max_requests_per_second: crawl.max_requests_per_second,
        }
    }
}

impl From<&CrawlConfig> for HttpClientConfig {
    fn from(crawl: &CrawlConfig) -> Self {
        Self {
            user_agent: crawl.user_agent.clone(),
            timeout_seconds: crawl.http_timeout_seconds,
            max_requests_per_second: crawl.max_requests_per_second,
        }
    }
}

/// Rate-limited HTTP client shared by the extractors.
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: HttpClientConfig,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> EtlResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| EtlError::validation(format!("invalid user agent: {e}")))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/rss+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7"),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .gzip(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| EtlError::validation(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second.max(1))
                .expect("max(1) guarantees non-zero"),
        );
        let rate_limiter = RateLimiter::direct(quota);

        Ok(Self {
            client,
            rate_limiter,
            config,
        })
    }

    /// Fetch a URL and return the decoded body text.
    ///
    /// Waits on the rate limiter, sends the request and reads the body, each
    /// step racing the cancellation signal. The response charset declared by
    /// the server is honoured during decoding.
    pub async fn get_text(&self, url: &str, cancel: &CancellationToken) -> EtlResult<String> {
        if cancel.is_cancelled() {
            return Err(EtlError::Cancelled);
        }

        tokio::select! {
            _ = self.rate_limiter.until_ready() => {}
            _ = cancel.cancelled() => {
                warn!("🛑 request cancelled while rate limited: {url}");
                return Err(EtlError::Cancelled);
            }
        }

        debug!("Fetching URL: {url}");

        let response = tokio::select! {
            result = self.client.get(url).send() => {
                result.map_err(EtlError::from_reqwest)?
            }
            _ = cancel.cancelled() => {
                warn!("🛑 HTTP request cancelled: {url}");
                return Err(EtlError::Cancelled);
            }
        };

        let response = Self::check_status(response, url)?;

        let text = tokio::select! {
            result = response.text() => {
                result.map_err(EtlError::from_reqwest)?
            }
            _ = cancel.cancelled() => {
                warn!("🛑 response read cancelled: {url}");
                return Err(EtlError::Cancelled);
            }
        };

        debug!("Fetched {url} ({} chars)", text.len());
        Ok(text)
    }

    /// Map a non-success status to the error taxonomy, surfacing any
    /// Retry-After hint on 429.
    fn check_status(response: Response, url: &str) -> EtlResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        Err(EtlError::from_status(status.as_u16(), url, retry_after))
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}
