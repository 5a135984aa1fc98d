use thiserror::Error;

use crate::types::Response;

/// Owned snapshot of a failed HTTP exchange.
///
/// `reqwest::Error` is not `Clone`, but batch dispatch fans one failure out to
/// every member of the batch, so the salient fields are captured here instead
/// of holding the original error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpErrorInfo {
    /// Human-readable description from the HTTP layer.
    pub message: String,
    /// The request did not complete within the HTTP client's own limits.
    pub is_timeout: bool,
    /// Connection could not be established.
    pub is_connect: bool,
    /// The request failed while being built or sent.
    pub is_request: bool,
}

impl From<&reqwest::Error> for HttpErrorInfo {
    fn from(err: &reqwest::Error) -> Self {
        Self {
            message: err.to_string(),
            is_timeout: err.is_timeout(),
            is_connect: err.is_connect(),
            is_request: err.is_request(),
        }
    }
}

impl std::fmt::Display for HttpErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Unified error type for the dispatch pipeline.
///
/// Every variant is cloneable: the batch coordinator applies a single failure
/// to N member requests, and duplicate callers receive independent copies of
/// their primary's outcome.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// No response was obtained from the network.
    #[error("Network transport error: {0}")]
    Transport(HttpErrorInfo),

    /// An attempt exceeded the duration allotted by the retry controller.
    ///
    /// Distinct from [`Error::Transport`]: the transport may still have been
    /// in flight when the timer fired.
    #[error("Reached request timeout in {timeout_ms} ms")]
    AttemptTimeout { timeout_ms: u64 },

    /// The server responded with a failing HTTP status (>= 400).
    ///
    /// Carries the normalized response so outer policies can consult the
    /// status and body.
    #[error("Server responded with HTTP {status}: {reason}")]
    Status {
        status: u16,
        reason: String,
        response: Box<Response>,
    },

    /// The response body could not be decoded as JSON.
    #[error("Invalid response payload: {0}")]
    Json(String),

    /// A combined batch call returned something other than an array.
    #[error("Combined response is not an array; the server may not support batched requests")]
    MalformedBatch,

    /// A combined response carried no entry for a dispatched member.
    #[error(
        "Server did not return a response for the request at index {index}; \
         the combined response should carry {expected} item(s)"
    )]
    MissingBatchPosition { index: usize, expected: usize },

    /// A response arrived but did not satisfy the GraphQL success contract
    /// (errors present, or `data` missing).
    #[error("Request `{operation}` failed: {reason}")]
    Request {
        operation: String,
        reason: String,
        response: Box<Response>,
    },

    /// The call was cancelled: a caller handle aborted the transport, or a
    /// retry hook aborted the wait.
    #[error("Aborted: {reason}")]
    Aborted { reason: String },

    /// Invalid pipeline assembly or policy configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Create an abort error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Error::Aborted {
            reason: reason.into(),
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status { status, .. } => Some(*status),
            Error::Request { response, .. } => Some(response.status()),
            _ => None,
        }
    }

    /// The normalized response carried by this error, if any.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Error::Status { response, .. } | Error::Request { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Whether this error is a cancellation.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted { .. })
    }

    /// Whether this error is a per-attempt timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::AttemptTimeout { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(HttpErrorInfo::from(&err))
    }
}

/// Cap a server-provided body excerpt so error messages stay bounded.
pub(crate) fn truncate_reason(text: &str) -> String {
    const MAX_LEN: usize = 4096;
    let text = text.trim();
    if text.len() <= MAX_LEN {
        return text.to_string();
    }
    let mut end = MAX_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{} (truncated)", &text[..end])
}
