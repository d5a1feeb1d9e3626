//! stencil-core: dynamic protobuf schema resolution from a registry.
//!
//! # Overview
//!
//! Stencil downloads a serialized `FileDescriptorSet` from a schema registry,
//! indexes every message type in it, and keeps the index fresh in the
//! background. The core crate is transport-agnostic and defines:
//!
//! - [`Fetcher`]: the async trait every HTTP stack implements
//! - [`TypeTree`]: decoded, immutable lookup index over one descriptor set
//! - [`DescriptorStore`]: shared, thread-safe map of source URL to tree
//! - [`refresh`] module: long-polling and version-based refresh strategies
//! - [`Client`] / [`MultiSourceClient`]: single and fail-over clients
//! - [`StencilError`]: structured error type
//! - [`policy`] module: retry with exponential backoff

pub mod client;
pub mod config;
pub mod error;
pub mod multi;
pub mod policy;
pub mod refresh;
pub mod store;
pub mod transport;
pub mod tree;

#[cfg(test)]
mod testutil;

pub use client::{Client, ClientBuilder, SchemaUpdateListener};
pub use config::{validate_source_url, ClientOptions, MAX_REFRESH_INTERVAL};
pub use error::StencilError;
pub use multi::{MultiSourceClient, MultiSourceClientBuilder};
pub use policy::{RetryConfig, RetryPolicy};
pub use refresh::{LongPollingRefresh, RefreshStrategy, RefreshStrategyKind, VersionBasedRefresh};
pub use store::DescriptorStore;
pub use transport::{join_path, FetchOptions, FetchResponse, Fetcher};
pub use tree::TypeTree;

pub use prost_reflect::{DynamicMessage, MessageDescriptor};
