//! Refresh strategies: decide, per attempt, whether a new descriptor set
//! has to be downloaded.
//!
//! ```text
//! long-polling:   GET <url>                          → payload
//! version-based:  GET <url>/versions                 → { "versions": [..] }
//!                 max > last accepted ?
//!                   GET <url>/versions/<max>         → payload
//!                 otherwise                          → no change
//! ```

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StencilError;
use crate::transport::{join_path, FetchOptions, Fetcher};

/// Selects the strategy a client builds for itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStrategyKind {
    /// Download the descriptor set on every refresh.
    #[default]
    LongPolling,
    /// Consult the registry's version listing and download only newer sets.
    VersionBased,
}

impl RefreshStrategyKind {
    /// Build a fresh strategy instance. Each client owns its own instance, so
    /// version state is never shared between sources.
    pub fn build(self) -> Box<dyn RefreshStrategy> {
        match self {
            Self::LongPolling => Box::new(LongPollingRefresh),
            Self::VersionBased => Box::new(VersionBasedRefresh::new()),
        }
    }
}

impl std::fmt::Display for RefreshStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LongPolling => write!(f, "long-polling"),
            Self::VersionBased => write!(f, "version-based"),
        }
    }
}

/// One refresh attempt: `Some(bytes)` is a new descriptor set, `None` means
/// the cached one is still current.
#[async_trait]
pub trait RefreshStrategy: Send + Sync + 'static {
    async fn refresh(
        &self,
        fetcher: &dyn Fetcher,
        source: &str,
        options: &FetchOptions,
    ) -> Result<Option<Bytes>, StencilError>;

    fn kind(&self) -> RefreshStrategyKind;
}

async fn download(
    fetcher: &dyn Fetcher,
    url: &str,
    options: &FetchOptions,
) -> Result<Bytes, StencilError> {
    let resp = fetcher.fetch(url, options).await?.error_for_status(url)?;
    Ok(resp.body)
}

/// Always downloads. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongPollingRefresh;

#[async_trait]
impl RefreshStrategy for LongPollingRefresh {
    async fn refresh(
        &self,
        fetcher: &dyn Fetcher,
        source: &str,
        options: &FetchOptions,
    ) -> Result<Option<Bytes>, StencilError> {
        download(fetcher, source, options).await.map(Some)
    }

    fn kind(&self) -> RefreshStrategyKind {
        RefreshStrategyKind::LongPolling
    }
}

#[derive(Debug, Deserialize)]
struct VersionList {
    #[serde(default)]
    versions: Option<Vec<i64>>,
}

/// Downloads only when the registry lists a version newer than the last one
/// accepted by this instance.
#[derive(Debug, Default)]
pub struct VersionBasedRefresh {
    /// 0 = nothing accepted yet. Only moves forward.
    last_version: AtomicI64,
}

impl VersionBasedRefresh {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last version whose payload was downloaded successfully.
    pub fn last_version(&self) -> i64 {
        self.last_version.load(Ordering::Acquire)
    }
}

#[async_trait]
impl RefreshStrategy for VersionBasedRefresh {
    async fn refresh(
        &self,
        fetcher: &dyn Fetcher,
        source: &str,
        options: &FetchOptions,
    ) -> Result<Option<Bytes>, StencilError> {
        let versions_url = join_path(source, "versions");
        let listing: VersionList = fetcher
            .fetch(&versions_url, options)
            .await?
            .error_for_status(&versions_url)?
            .json()?;

        let last = self.last_version();
        let latest = listing.versions.unwrap_or_default().into_iter().max();
        let latest = match latest {
            Some(v) if v > last => v,
            _ => {
                tracing::debug!(url = %source, last_version = last, "schema already up to date");
                return Ok(None);
            }
        };

        let versioned_url = join_path(&versions_url, &latest.to_string());
        let payload = download(fetcher, &versioned_url, options).await?;
        self.last_version.store(latest, Ordering::Release);
        tracing::info!(url = %source, version = latest, "downloaded new schema version");
        Ok(Some(payload))
    }

    fn kind(&self) -> RefreshStrategyKind {
        RefreshStrategyKind::VersionBased
    }
}
