//! Descriptor fetcher backed by `reqwest`.
//!
//! Features:
//! - Automatic retry with exponential backoff for transient errors
//! - Retry on `429` and `5xx` responses
//! - Per-request method, headers and timeout taken from [`FetchOptions`]

use async_trait::async_trait;

use stencil_core::error::StencilError;
use stencil_core::policy::{RetryConfig, RetryPolicy};
use stencil_core::transport::{FetchOptions, FetchResponse, Fetcher};

/// Configuration for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub retry: RetryConfig,
    pub user_agent: String,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            user_agent: concat!("stencil/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// HTTP fetcher shared by every client that downloads descriptors.
///
/// Holds one connection pool; clone the surrounding `Arc` rather than
/// building a fetcher per client.
pub struct HttpFetcher {
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> Result<Self, StencilError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| StencilError::InvalidConfiguration(format!("http client: {e}")))?;

        Ok(Self {
            http,
            retry: RetryPolicy::new(config.retry),
        })
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Result<Self, StencilError> {
        Self::new(HttpFetcherConfig::default())
    }

    async fn fetch_once(
        &self,
        method: &reqwest::Method,
        url: &str,
        options: &FetchOptions,
    ) -> Result<FetchResponse, StencilError> {
        let mut req = self
            .http
            .request(method.clone(), url)
            .timeout(options.timeout);
        for (name, value) in &options.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req.send().await.map_err(|e| classify(e, options))?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(|e| classify(e, options))?;
        Ok(FetchResponse::new(status, body))
    }
}

fn classify(err: reqwest::Error, options: &FetchOptions) -> StencilError {
    if err.is_timeout() {
        StencilError::Timeout {
            ms: options.timeout.as_millis() as u64,
        }
    } else if err.is_builder() {
        StencilError::InvalidConfiguration(err.to_string())
    } else {
        StencilError::Http(err.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<FetchResponse, StencilError> {
        let method = reqwest::Method::from_bytes(options.method.as_bytes()).map_err(|_| {
            StencilError::InvalidConfiguration(format!("invalid http method {:?}", options.method))
        })?;

        // Retry loop
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = self.fetch_once(&method, url, options).await;
            let retry_reason = match &outcome {
                Ok(resp) if RetryPolicy::is_retryable_status(resp.status) => {
                    format!("HTTP {}", resp.status)
                }
                Err(e) if e.is_retryable() => e.to_string(),
                _ => return outcome,
            };

            match self.retry.next_delay(attempt) {
                Some(delay) => {
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %retry_reason,
                        url = %url,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::error!(
                        attempt,
                        error = %retry_reason,
                        url = %url,
                        "max retries exceeded"
                    );
                    return outcome;
                }
            }
        }
    }
}
