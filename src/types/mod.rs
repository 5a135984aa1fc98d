//! 类型系统模块：定义查询操作、请求信封与规范化响应的核心数据类型。
//!
//! # Types Module
//!
//! This module defines the value objects flowing through the dispatch
//! pipeline: the operations callers submit, the request envelopes policies
//! pass toward the transport, and the normalized responses coming back.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Operation`] | A logical query/mutation with stable identity and variables |
//! | [`OperationKind`] | Query vs. mutation |
//! | [`CacheDirectives`] | Per-call `force` / `skip_batch` flags |
//! | [`Uploadable`] | Binary attachment carried by a multipart operation |
//! | [`Request`] | Either a single operation or a combined batch envelope |
//! | [`BatchRequest`] | Ordered member operations sharing one network call |
//! | [`Response`] | Normalized result: status, headers, data, error list |
//! | [`GraphqlError`] | One server-side error with optional source locations |
//!
//! ## Example
//!
//! ```rust
//! use gql_net::Operation;
//! use serde_json::json;
//!
//! let op = Operation::query("query Me { me { name } }")
//!     .with_id("Me")
//!     .with_variables(json!({ "locale": "en" }));
//! assert!(!op.is_mutation());
//! ```

pub mod operation;
pub mod request;
pub mod response;

pub use operation::{CacheDirectives, Operation, OperationKind, Uploadable};
pub use request::{BatchRequest, Request};
pub use response::{ErrorLocation, GraphqlError, Response};
