//! 策略流水线：以确定的顺序将独立策略组合到终端传输调用之上。
//!
//! # Policy Pipeline
//!
//! This module implements the composition mechanism that turns an ordered
//! list of independently-authored policies plus a terminal transport call
//! into one callable. Each policy is a pure wrapper `(next: Call) -> Call`;
//! the last policy in the list sits closest to the transport, the first is
//! the outermost wrapper seen by callers.
//!
//! ## Stages
//!
//! Policies are tagged by the stage they run at with an explicit enum, never
//! shape-sniffing:
//!
//! | Stage | Contract | Examples |
//! |-------|----------|----------|
//! | [`Policy::Preflight`] | sync `&Operation -> Option<Response>` | local short-circuits |
//! | [`Policy::Request`] | async `Request -> Response` | batch, cache, retry, auth |
//! | [`Policy::Raw`] | async `Request -> WireResponse` | wire-level tweaks |
//!
//! Assembly nests the stages: request-level policies wrap the normalization
//! step, which wraps the raw chain, which wraps the transport terminal.
//! Normalization converts a [`WireResponse`] into a [`Response`] and raises
//! [`Error::Status`] for statuses `>= 400`.
//!
//! ## Example
//!
//! ```rust
//! use gql_net::pipeline::{compose, Call};
//! use gql_net::types::Response;
//! use std::sync::Arc;
//!
//! // compose() with zero policies returns the terminal unchanged.
//! let terminal: Call = Arc::new(|_req| {
//!     Box::pin(async { Ok(Response::from_graphql(serde_json::json!({"data": {}}))) })
//! });
//! let chain = compose(Vec::new(), terminal);
//! # let _ = chain;
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::truncate_reason;
use crate::transport::{Transport, WireResponse};
use crate::types::{Operation, Request, Response};
use crate::{Error, Result};

pub mod auth;
pub mod batch;
pub mod cache;
pub mod logging;
pub mod persisted;
pub mod retry;
pub mod url;

pub use auth::{AuthConfig, AuthMiddleware, TokenSource};
pub use batch::{BatchConfig, BatchEndpoint, BatchMiddleware};
pub use cache::{CacheConfig, CacheMiddleware};
pub use logging::{GraphqlErrorLogger, LoggingMiddleware};
pub use persisted::PersistedQueriesMiddleware;
pub use retry::{
    RetryConfig, RetryControls, RetryMeta, RetryMiddleware, RetrySchedule, RetryStatuses,
    RetryTimeout,
};
pub use url::{EndpointSource, UrlMiddleware};

/// A normalized call: `Request -> Response`.
pub type Call = Arc<dyn Fn(Request) -> BoxFuture<'static, Result<Response>> + Send + Sync>;

/// A wire-level call: `Request -> WireResponse`.
pub type RawCall = Arc<dyn Fn(Request) -> BoxFuture<'static, Result<WireResponse>> + Send + Sync>;

/// A request-stage policy: wraps a normalized call.
///
/// Implementations may inspect or mutate the request, short-circuit without
/// calling `next`, or call `next` multiple times; they must preserve the
/// at-most-once-settlement contract of the call they return.
pub trait Middleware: Send + Sync {
    fn apply(self: Arc<Self>, next: Call) -> Call;
}

/// A raw-stage policy: wraps the wire-level call, inside normalization.
pub trait RawMiddleware: Send + Sync {
    fn apply(self: Arc<Self>, next: RawCall) -> RawCall;
}

/// A synchronous hook consulted before the chain runs; returning a ready
/// [`Response`] short-circuits dispatch entirely.
pub trait Preflight: Send + Sync {
    fn check(&self, operation: &Operation) -> Option<Response>;
}

/// One policy slot in a client's ordered policy list.
#[derive(Clone)]
pub enum Policy {
    Preflight(Arc<dyn Preflight>),
    Request(Arc<dyn Middleware>),
    Raw(Arc<dyn RawMiddleware>),
}

/// Right-to-left fold of request-stage policies over a terminal call.
///
/// The last policy in `middlewares` is applied first (innermost); composing
/// zero policies returns `terminal` unchanged.
pub fn compose(middlewares: Vec<Arc<dyn Middleware>>, terminal: Call) -> Call {
    middlewares
        .into_iter()
        .rev()
        .fold(terminal, |next, middleware| middleware.apply(next))
}

/// Right-to-left fold of raw-stage policies over the transport terminal.
pub fn compose_raw(middlewares: Vec<Arc<dyn RawMiddleware>>, terminal: RawCall) -> RawCall {
    middlewares
        .into_iter()
        .rev()
        .fold(terminal, |next, middleware| middleware.apply(next))
}

/// The transport as a [`RawCall`].
pub(crate) fn terminal(transport: Arc<dyn Transport>) -> RawCall {
    Arc::new(move |request| {
        let transport = transport.clone();
        Box::pin(async move { transport.send(&request).await })
    })
}

/// Normalization step between the request and raw stages: decode the wire
/// response and raise a status error (carrying the full [`Response`]) for
/// statuses `>= 400`.
pub(crate) fn normalize(next: RawCall) -> Call {
    Arc::new(move |request| {
        let next = next.clone();
        Box::pin(async move {
            let wire = next(request).await?;
            let response = Response::from_wire(wire)?;
            if response.status() >= 400 {
                return Err(Error::Status {
                    status: response.status(),
                    reason: truncate_reason(response.raw_text()),
                    response: Box::new(response),
                });
            }
            Ok(response)
        })
    })
}

/// Assemble a full chain from an ordered policy list and a transport.
///
/// Preflight policies are returned separately (they run synchronously before
/// the chain); request and raw policies keep their relative order within
/// their stage.
pub(crate) fn assemble(
    policies: Vec<Policy>,
    transport: Arc<dyn Transport>,
) -> (Vec<Arc<dyn Preflight>>, Call) {
    let mut preflights = Vec::new();
    let mut request_stage = Vec::new();
    let mut raw_stage = Vec::new();
    for policy in policies {
        match policy {
            Policy::Preflight(p) => preflights.push(p),
            Policy::Request(m) => request_stage.push(m),
            Policy::Raw(m) => raw_stage.push(m),
        }
    }
    let chain = compose(
        request_stage,
        normalize(compose_raw(raw_stage, terminal(transport))),
    );
    (preflights, chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Appends a marker to a shared trace on the way in, so composition
    /// order is observable.
    struct Tracer {
        marker: &'static str,
        trace: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl Middleware for Tracer {
        fn apply(self: Arc<Self>, next: Call) -> Call {
            Arc::new(move |request| {
                let this = self.clone();
                let next = next.clone();
                Box::pin(async move {
                    this.trace.lock().unwrap().push(this.marker);
                    next(request).await
                })
            })
        }
    }

    fn ready_terminal() -> Call {
        Arc::new(|_request| {
            Box::pin(async { Ok(Response::from_graphql(json!({ "data": { "ok": true } }))) })
        })
    }

    fn request() -> Request {
        Request::Single(Operation::query("query Q { f }").with_id("Q"))
    }

    #[tokio::test]
    async fn compose_applies_first_policy_outermost() {
        let trace = Arc::new(std::sync::Mutex::new(Vec::new()));
        let chain = compose(
            vec![
                Arc::new(Tracer {
                    marker: "outer",
                    trace: trace.clone(),
                }) as Arc<dyn Middleware>,
                Arc::new(Tracer {
                    marker: "inner",
                    trace: trace.clone(),
                }),
            ],
            ready_terminal(),
        );
        chain(request()).await.unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["outer", "inner"]);
    }

    #[tokio::test]
    async fn compose_with_no_policies_is_identity() {
        let chain = compose(Vec::new(), ready_terminal());
        let response = chain(request()).await.unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn short_circuiting_policy_skips_the_terminal() {
        struct ShortCircuit;
        impl Middleware for ShortCircuit {
            fn apply(self: Arc<Self>, _next: Call) -> Call {
                Arc::new(|_request| {
                    Box::pin(async {
                        Ok(Response::from_graphql(json!({ "data": { "local": 1 } })))
                    })
                })
            }
        }
        let terminal: Call = Arc::new(|_request| {
            Box::pin(async { panic!("terminal must not run") })
        });
        let chain = compose(vec![Arc::new(ShortCircuit) as Arc<dyn Middleware>], terminal);
        let response = chain(request()).await.unwrap();
        assert_eq!(response.data().unwrap()["local"], json!(1));
    }

    #[tokio::test]
    async fn normalization_raises_status_errors() {
        let raw: RawCall = Arc::new(|_request| {
            Box::pin(async {
                Ok(WireResponse {
                    status: 502,
                    url: "http://t.test/graphql".to_string(),
                    headers: Default::default(),
                    body: bytes::Bytes::from_static(b"bad gateway"),
                })
            })
        });
        let err = normalize(raw)(request()).await.unwrap_err();
        match err {
            Error::Status { status, reason, .. } => {
                assert_eq!(status, 502);
                assert_eq!(reason, "bad gateway");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn normalization_decodes_success_bodies() {
        let raw: RawCall = Arc::new(|_request| {
            Box::pin(async {
                Ok(WireResponse {
                    status: 200,
                    url: "http://t.test/graphql".to_string(),
                    headers: Default::default(),
                    body: bytes::Bytes::from_static(br#"{"data":{"n":7}}"#),
                })
            })
        });
        let response = normalize(raw)(request()).await.unwrap();
        assert_eq!(response.data().unwrap()["n"], json!(7));
    }
}
