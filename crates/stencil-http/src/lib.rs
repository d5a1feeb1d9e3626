//! stencil-http: `reqwest` transport for Stencil clients.
//!
//! [`HttpFetcher`] implements [`stencil_core::Fetcher`]. [`connect`] and
//! [`connect_multi`] wire a default fetcher into a client in one call.

pub mod fetcher;

use std::sync::Arc;

use stencil_core::{Client, ClientOptions, MultiSourceClient, StencilError};

pub use fetcher::{HttpFetcher, HttpFetcherConfig};

/// Connect a single-source client using a default [`HttpFetcher`].
pub async fn connect(url: impl Into<String>, options: ClientOptions) -> Result<Client, StencilError> {
    let fetcher = Arc::new(HttpFetcher::with_defaults()?);
    Client::connect(url, options, fetcher).await
}

/// Connect a multi-source client using one shared default [`HttpFetcher`].
pub async fn connect_multi<I, S>(
    urls: I,
    options: ClientOptions,
) -> Result<MultiSourceClient, StencilError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let fetcher = Arc::new(HttpFetcher::with_defaults()?);
    MultiSourceClient::connect(urls, options, fetcher).await
}
