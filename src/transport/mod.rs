//! 传输层：终端调用契约与 HTTP 实现。
//!
//! # Transport Layer
//!
//! The terminal call of the pipeline: everything inward of the policies is a
//! [`Transport`], a trait so tests can substitute an in-process fake for the
//! HTTP implementation.
//!
//! A transport receives a [`Request`] (single operation or combined batch
//! envelope) and yields a [`WireResponse`]: status, headers, and body exactly
//! as received, before any normalization.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

use crate::types::Request;
use crate::Result;

mod http;

pub use http::HttpTransport;

/// Status/headers/body as received from the network, before normalization.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    /// Final URL the exchange was served from.
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// The terminal call contract.
///
/// May fail with a transport error (no response obtained) or resolve with any
/// status; classifying the status is the normalization step's job, not the
/// transport's.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &Request) -> Result<WireResponse>;
}
