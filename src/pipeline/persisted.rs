//! Persisted-queries policy: dispatch document ids, fall back to full text.

use std::sync::Arc;

use tracing::warn;

use crate::pipeline::{Call, Middleware};
use crate::types::Request;
use crate::Error;

/// Rewrites each single operation to its persisted form (`doc_id` in place of
/// the query text) before dispatch. When the server rejects the persisted
/// form, the original operation is re-dispatched once with the full query
/// text; a rejection of the fallback is final.
///
/// "Rejects" covers both failed dispatches and responses that miss the
/// success contract (a server that does not know the document id typically
/// answers 200 with an error list). Aborts are terminal and never fall back.
///
/// Multipart operations and combined envelopes pass through untouched; batch
/// members admitted after this policy keep their persisted bodies.
pub struct PersistedQueriesMiddleware;

impl PersistedQueriesMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PersistedQueriesMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for PersistedQueriesMiddleware {
    fn apply(self: Arc<Self>, next: Call) -> Call {
        Arc::new(move |request| {
            let next = next.clone();
            Box::pin(async move {
                let operation = match &request {
                    Request::Single(op) if !op.is_persisted() && !op.is_multipart() => op.clone(),
                    _ => return next(request).await,
                };
                if operation.id().is_empty() {
                    return Err(Error::config(
                        "persisted queries require a non-empty operation id",
                    ));
                }

                let persisted = operation.clone().with_persisted();
                match next(Request::Single(persisted)).await {
                    Ok(response) if response.is_success() => Ok(response),
                    Err(err) if err.is_abort() => Err(err),
                    rejected => {
                        let reason = match &rejected {
                            Ok(_) => "response missed the success contract".to_string(),
                            Err(err) => err.to_string(),
                        };
                        warn!(
                            operation = %operation.id(),
                            reason = %reason,
                            "persisted dispatch rejected; falling back to full query text"
                        );
                        next(Request::Single(operation)).await
                    }
                }
            })
        })
    }
}
