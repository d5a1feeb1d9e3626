//! Reliability policies applied by fetcher implementations.

pub mod retry;

pub use retry::{RetryConfig, RetryPolicy};
