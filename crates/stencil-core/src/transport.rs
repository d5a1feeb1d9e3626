//! The `Fetcher` trait: the seam between Stencil and whatever HTTP stack
//! downloads descriptor sets.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::error::StencilError;

/// Per-request transport options, handed to the fetcher unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    /// HTTP method. `GET` unless the registry needs something else.
    #[serde(default = "default_method")]
    pub method: String,
    /// Extra headers, e.g. `Authorization`.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Time limit for one request, in milliseconds on the wire.
    #[serde(default = "default_timeout", with = "duration_ms")]
    pub timeout: Duration,
}

fn default_method() -> String {
    "GET".into()
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: default_method(),
            headers: HashMap::new(),
            timeout: default_timeout(),
        }
    }
}

impl FetchOptions {
    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A raw registry response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns `true` for a 2xx status.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, StencilError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Convert a non-ok response into [`StencilError::DownloadFailed`].
    pub fn error_for_status(self, url: &str) -> Result<Self, StencilError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(StencilError::DownloadFailed {
                url: url.to_string(),
                status: self.status,
            })
        }
    }
}

/// Downloads registry resources.
///
/// Implementations return non-ok responses as `Ok` so the refresh layer can
/// decide how to report them; `Err` is reserved for requests that never
/// produced a response.
///
/// The trait is object-safe and is shared as `Arc<dyn Fetcher>`.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &str, options: &FetchOptions)
        -> Result<FetchResponse, StencilError>;
}

/// Join `segment` onto `base` with exactly one `/` between them.
pub fn join_path(base: &str, segment: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        segment.trim_start_matches('/')
    )
}
