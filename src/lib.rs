//! # gql-net
//!
//! 可组合的 GraphQL 网络层：请求合批、超时重试与响应缓存组成的弹性调度流水线。
//!
//! A composable GraphQL network layer: a resilient request-dispatch pipeline
//! between an application and a remote query endpoint, with batching, retry,
//! and caching policies over a pluggable transport.
//!
//! ## Overview
//!
//! Callers submit [`Operation`]s (query/mutation descriptors with an id,
//! query text, variables, and per-call cache directives). The client composes
//! a chain of independent policies around a terminal transport call and
//! returns a normalized [`Response`]:
//!
//! ```text
//! caller → batch (may delay/merge) → cache (may short-circuit)
//!        → retry (may repeat) → normalization → transport → Response
//! ```
//!
//! ## Key Features
//!
//! - **Pipeline composition**: independently-authored policies wrap the
//!   terminal call in a deterministic, overridable order ([`pipeline`])
//! - **Batching**: concurrent operations share one network call within a
//!   time/size window, with duplicate coalescing ([`pipeline::BatchMiddleware`])
//! - **Retry**: per-attempt timeouts, backoff schedules, and caller-driven
//!   force-retry/abort ([`pipeline::RetryMiddleware`])
//! - **Caching**: bounded, TTL-aware memoization keyed by operation identity
//!   and variables ([`pipeline::CacheMiddleware`])
//! - **Auth / Url / Persisted queries / Logging**: companion policies for
//!   header injection, endpoint selection, `doc_id` dispatch with full-text
//!   fallback, and request logging
//! - **Cancellation**: caller-held handles aborting in-flight transports
//!   ([`client::cancel_pair`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use gql_net::{GqlClient, Operation};
//! use gql_net::pipeline::{BatchConfig, CacheConfig, RetryConfig};
//! use serde_json::json;
//!
//! # async fn run() -> gql_net::Result<()> {
//! let client = GqlClient::builder()
//!     .endpoint("https://api.example.com/graphql")
//!     .with_batch(BatchConfig::new())
//!     .with_cache(CacheConfig::new())
//!     .with_retry(RetryConfig::new())
//!     .build()?;
//!
//! let viewer = client
//!     .execute(
//!         Operation::query("query Viewer($locale: String) { viewer { name } }")
//!             .with_id("Viewer")
//!             .with_variable("locale", json!("en")),
//!     )
//!     .await?;
//! println!("{:?}", viewer.data());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod error;
pub mod pipeline;
pub mod transport;
pub mod types;

pub use client::{cancel_pair, CancelHandle, CancelSignal, GqlClient, GqlClientBuilder};
pub use error::Error;
pub use pipeline::Policy;
pub use types::{Operation, Response};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
