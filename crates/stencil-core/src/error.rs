//! Error types shared by every Stencil component.

use thiserror::Error;

/// Errors that can occur while fetching, decoding or querying descriptors.
#[derive(Debug, Error)]
pub enum StencilError {
    /// The registry answered with a non-success status.
    #[error("Unable to download descriptor file")]
    DownloadFailed {
        url: String,
        /// HTTP status of the rejected response.
        status: u16,
    },

    /// The request could not be sent or its body could not be read.
    #[error("request failed: {0}")]
    Http(String),

    /// Request timed out after the configured duration.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Bytes were not a descriptor set, a version listing or a message of the
    /// requested type.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// The descriptor set decoded but references types it does not contain.
    #[error("{0}")]
    SchemaInvalid(String),

    /// No type with this fully-qualified name is loaded.
    #[error("no such type: {0}")]
    TypeNotFound(String),

    /// Missing or malformed configuration, detected before any network call.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl StencilError {
    /// Returns `true` if the failure is transient and the request may succeed
    /// when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout { .. })
    }

    /// Returns `true` for a lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TypeNotFound(_))
    }

    /// Returns `true` if a newer descriptor set might make the failed
    /// operation succeed: the type is missing or the data does not fit it.
    pub fn is_stale_schema(&self) -> bool {
        matches!(self, Self::TypeNotFound(_) | Self::DecodeFailed(_))
    }
}

impl From<serde_json::Error> for StencilError {
    fn from(err: serde_json::Error) -> Self {
        Self::DecodeFailed(err.to_string())
    }
}
