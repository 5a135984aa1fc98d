//! Logging policies: request lifecycle and server-side error reporting.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::pipeline::{Call, Middleware};
use crate::types::response::format_graphql_errors;
use crate::types::Request;

/// Logs every dispatch with its outcome and duration.
#[derive(Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for LoggingMiddleware {
    fn apply(self: Arc<Self>, next: Call) -> Call {
        Arc::new(move |request| {
            let next = next.clone();
            Box::pin(async move {
                let id = request.id();
                debug!(request = %id, "dispatch started");
                let started = Instant::now();
                let outcome = next(request).await;
                let duration_ms = started.elapsed().as_millis() as u64;
                match &outcome {
                    Ok(response) => info!(
                        request = %id,
                        http_status = response.status(),
                        duration_ms,
                        "dispatch completed"
                    ),
                    Err(err) => warn!(
                        request = %id,
                        error = %err,
                        duration_ms,
                        "dispatch failed"
                    ),
                }
                outcome
            })
        })
    }
}

/// Reports GraphQL error lists carried by otherwise successful transports,
/// with locations rendered against the query text.
#[derive(Default)]
pub struct GraphqlErrorLogger;

impl GraphqlErrorLogger {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for GraphqlErrorLogger {
    fn apply(self: Arc<Self>, next: Call) -> Call {
        Arc::new(move |request| {
            let next = next.clone();
            Box::pin(async move {
                let query = match &request {
                    Request::Single(op) => Some(op.query_text().to_string()),
                    Request::Batch(_) => None,
                };
                let outcome = next(request).await;
                if let (Ok(response), Some(query)) = (&outcome, query) {
                    if !response.errors().is_empty() {
                        warn!(
                            "server returned GraphQL errors:\n{}",
                            format_graphql_errors(&query, response.errors())
                        );
                    }
                }
                outcome
            })
        })
    }
}
