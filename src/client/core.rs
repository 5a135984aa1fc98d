use std::sync::Arc;

use tracing::debug;

use crate::error::truncate_reason;
use crate::pipeline::{Call, Preflight};
use crate::types::response::format_graphql_errors;
use crate::types::{Operation, Request, Response};
use crate::{Error, Result};

/// Entry point over one assembled policy chain.
///
/// Cheap to clone; clones share the chain, so batching and caching policies
/// keep working across clones.
#[derive(Clone)]
pub struct GqlClient {
    preflights: Arc<[Arc<dyn Preflight>]>,
    chain: Call,
    no_throw: bool,
}

impl std::fmt::Debug for GqlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GqlClient")
            .field("preflights", &self.preflights.len())
            .field("no_throw", &self.no_throw)
            .finish_non_exhaustive()
    }
}

impl GqlClient {
    pub fn builder() -> crate::client::GqlClientBuilder {
        crate::client::GqlClientBuilder::new()
    }

    pub(crate) fn assembled(
        preflights: Vec<Arc<dyn Preflight>>,
        chain: Call,
        no_throw: bool,
    ) -> Self {
        Self {
            preflights: preflights.into(),
            chain,
            no_throw,
        }
    }

    /// Dispatch one operation through the chain.
    ///
    /// The final success check requires a 2xx status, an empty error list,
    /// and present `data`; anything else is converted into an error carrying
    /// the response, unless the client was built with `no_throw`, in which
    /// case the response comes back as-is.
    pub async fn execute(&self, operation: Operation) -> Result<Response> {
        for preflight in self.preflights.iter() {
            if let Some(response) = preflight.check(&operation) {
                debug!(operation = %operation.id(), "preflight short-circuited dispatch");
                return Ok(response);
            }
        }

        let id = operation.id().to_string();
        let query = operation.query_text().to_string();
        let response = (self.chain)(Request::Single(operation)).await?;

        if self.no_throw || response.is_success() {
            return Ok(response);
        }
        Err(request_error(id, &query, response))
    }
}

/// The final-check failure: formatted GraphQL error details when the server
/// sent any, otherwise the missing-data protocol condition.
fn request_error(operation: String, query: &str, response: Response) -> Error {
    let reason = if !response.errors().is_empty() {
        format_graphql_errors(query, response.errors())
    } else if response.data().is_none() {
        "Server return empty response.data".to_string()
    } else {
        truncate_reason(response.raw_text())
    };
    Error::Request {
        operation,
        reason,
        response: Box::new(response),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::GqlClientBuilder;
    use crate::transport::{Transport, WireResponse};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedTransport {
        status: u16,
        body: &'static str,
        calls: AtomicUsize,
    }

    impl FixedTransport {
        fn new(status: u16, body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                status,
                body,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(&self, _request: &Request) -> Result<WireResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(WireResponse {
                status: self.status,
                url: "http://fixed.test/graphql".to_string(),
                headers: HashMap::new(),
                body: bytes::Bytes::from_static(self.body.as_bytes()),
            })
        }
    }

    fn client(transport: Arc<FixedTransport>) -> GqlClient {
        GqlClientBuilder::new()
            .endpoint("http://fixed.test/graphql")
            .transport(transport)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn successful_dispatch_returns_data() {
        let transport = FixedTransport::new(200, r#"{"data":{"me":{"id":"1"}}}"#);
        let response = client(transport)
            .execute(Operation::query("query Me { me { id } }"))
            .await
            .unwrap();
        assert_eq!(response.data().unwrap()["me"]["id"], json!("1"));
    }

    #[tokio::test]
    async fn graphql_errors_fail_the_final_check() {
        let transport =
            FixedTransport::new(200, r#"{"data":null,"errors":[{"message":"nope"}]}"#);
        let err = client(transport)
            .execute(Operation::query("query Me { me { id } }"))
            .await
            .unwrap_err();
        match err {
            Error::Request { reason, .. } => assert!(reason.contains("nope")),
            other => panic!("expected request error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_throw_returns_the_response_as_is() {
        let transport =
            FixedTransport::new(200, r#"{"data":null,"errors":[{"message":"nope"}]}"#);
        let client = GqlClientBuilder::new()
            .endpoint("http://fixed.test/graphql")
            .transport(transport)
            .no_throw(true)
            .build()
            .unwrap();
        let response = client
            .execute(Operation::query("query Me { me { id } }"))
            .await
            .unwrap();
        assert!(!response.is_success());
        assert_eq!(response.errors()[0].message, "nope");
    }

    #[tokio::test]
    async fn failing_status_surfaces_as_status_error() {
        let transport = FixedTransport::new(503, "overloaded");
        let err = client(transport)
            .execute(Operation::query("query Me { me { id } }"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn preflight_short_circuits_the_transport() {
        struct Canned;
        impl Preflight for Canned {
            fn check(&self, operation: &Operation) -> Option<Response> {
                (operation.id() == "Local")
                    .then(|| Response::from_graphql(json!({ "data": { "local": true } })))
            }
        }
        let transport = FixedTransport::new(200, r#"{"data":{}}"#);
        let client = GqlClientBuilder::new()
            .endpoint("http://fixed.test/graphql")
            .transport(transport.clone())
            .policy(crate::pipeline::Policy::Preflight(Arc::new(Canned)))
            .build()
            .unwrap();

        let response = client
            .execute(Operation::query("query L { l }").with_id("Local"))
            .await
            .unwrap();
        assert_eq!(response.data().unwrap()["local"], json!(true));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_endpoint_is_a_build_error() {
        let err = GqlClientBuilder::new()
            .endpoint("not a url")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
