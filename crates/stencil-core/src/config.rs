//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StencilError;
use crate::refresh::RefreshStrategyKind;
use crate::transport::FetchOptions;

/// Options shared by [`Client`](crate::Client) and
/// [`MultiSourceClient`](crate::MultiSourceClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// Run a background timer that refreshes the descriptors.
    #[serde(default)]
    pub should_refresh: bool,
    /// Time between background refreshes, in seconds on the wire.
    #[serde(default = "default_refresh_interval", with = "duration_secs")]
    pub refresh_interval: Duration,
    /// How each refresh decides whether to download.
    #[serde(default)]
    pub refresh_strategy: RefreshStrategyKind,
    /// Passed through to the fetcher on every request.
    #[serde(default)]
    pub transport: FetchOptions,
}

/// Longest accepted `refresh_interval`. Larger values cannot be scheduled on
/// the runtime clock.
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn default_refresh_interval() -> Duration {
    Duration::from_secs(12 * 60 * 60)
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            should_refresh: false,
            refresh_interval: default_refresh_interval(),
            refresh_strategy: RefreshStrategyKind::default(),
            transport: FetchOptions::default(),
        }
    }
}

impl ClientOptions {
    /// Enable the background timer with the given interval.
    pub fn with_refresh(mut self, interval: Duration) -> Self {
        self.should_refresh = true;
        self.refresh_interval = interval;
        self
    }

    pub fn with_strategy(mut self, kind: RefreshStrategyKind) -> Self {
        self.refresh_strategy = kind;
        self
    }

    pub fn with_transport(mut self, transport: FetchOptions) -> Self {
        self.transport = transport;
        self
    }

    /// Reject options that can never work.
    pub fn validate(&self) -> Result<(), StencilError> {
        if self.should_refresh && self.refresh_interval.is_zero() {
            return Err(StencilError::InvalidConfiguration(
                "refresh_interval must be greater than zero when should_refresh is set".into(),
            ));
        }
        if self.should_refresh && self.refresh_interval > MAX_REFRESH_INTERVAL {
            return Err(StencilError::InvalidConfiguration(format!(
                "refresh_interval of {}s exceeds the maximum of {}s",
                self.refresh_interval.as_secs(),
                MAX_REFRESH_INTERVAL.as_secs()
            )));
        }
        if self.transport.timeout.is_zero() {
            return Err(StencilError::InvalidConfiguration(
                "transport timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Check that `source` is an absolute http(s) URL.
pub fn validate_source_url(source: &str) -> Result<(), StencilError> {
    if source.trim().is_empty() {
        return Err(StencilError::InvalidConfiguration(
            "registry url is required".into(),
        ));
    }
    let parsed = url::Url::parse(source).map_err(|e| {
        StencilError::InvalidConfiguration(format!("invalid registry url {source:?}: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(StencilError::InvalidConfiguration(format!(
            "unsupported url scheme {other:?} in {source:?}"
        ))),
    }
}

pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
