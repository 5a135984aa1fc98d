//! Request envelopes handed from policy to policy.

use std::collections::HashMap;

use crate::client::CancelSignal;
use crate::types::Operation;
use crate::Result;

/// A combined envelope carrying every member of one batch call.
///
/// The wire body is the members' bodies joined into one JSON array, in
/// admission order. A combined envelope has no variables of its own and is
/// never a mutation or multipart payload.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    operations: Vec<Operation>,
    url: Option<String>,
    headers: HashMap<String, String>,
    cancel: Option<CancelSignal>,
}

impl BatchRequest {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            operations,
            url: None,
            headers: HashMap::new(),
            cancel: None,
        }
    }

    /// Composite identity derived from the member ids.
    pub fn id(&self) -> String {
        let ids: Vec<&str> = self.operations.iter().map(Operation::id).collect();
        format!("BATCH_REQUEST:{}", ids.join(":"))
    }

    pub fn body(&self) -> Result<String> {
        let mut parts = Vec::with_capacity(self.operations.len());
        for op in &self.operations {
            parts.push(op.body()?);
        }
        Ok(format!("[{}]", parts.join(",")))
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub(crate) fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub(crate) fn insert_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub(crate) fn remove_header(&mut self, name: &str) {
        self.headers.remove(name);
    }

    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn cancel_signal(&self) -> Option<&CancelSignal> {
        self.cancel.as_ref()
    }
}

/// What a policy passes to `next`: one operation, or a combined envelope
/// produced by the batch coordinator.
#[derive(Debug, Clone)]
pub enum Request {
    Single(Operation),
    Batch(BatchRequest),
}

impl Request {
    pub fn id(&self) -> String {
        match self {
            Request::Single(op) => op.id().to_string(),
            Request::Batch(batch) => batch.id(),
        }
    }

    pub fn body(&self) -> Result<String> {
        match self {
            Request::Single(op) => op.body().map(str::to_string),
            Request::Batch(batch) => batch.body(),
        }
    }

    pub fn is_mutation(&self) -> bool {
        match self {
            Request::Single(op) => op.is_mutation(),
            Request::Batch(_) => false,
        }
    }

    pub fn is_multipart(&self) -> bool {
        match self {
            Request::Single(op) => op.is_multipart(),
            Request::Batch(_) => false,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Request::Single(op) => op.url(),
            Request::Batch(batch) => batch.url(),
        }
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        match self {
            Request::Single(op) => op.headers(),
            Request::Batch(batch) => batch.headers(),
        }
    }

    pub(crate) fn insert_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        match self {
            Request::Single(op) => op.insert_header(name, value),
            Request::Batch(batch) => batch.insert_header(name, value),
        }
    }

    pub(crate) fn remove_header(&mut self, name: &str) {
        match self {
            Request::Single(op) => op.remove_header(name),
            Request::Batch(batch) => batch.remove_header(name),
        }
    }

    pub(crate) fn set_url(&mut self, url: impl Into<String>) {
        match self {
            Request::Single(op) => op.set_url(url),
            Request::Batch(batch) => batch.set_url(url),
        }
    }

    pub fn cancel_signal(&self) -> Option<&CancelSignal> {
        match self {
            Request::Single(op) => op.cancel_signal(),
            Request::Batch(batch) => batch.cancel_signal(),
        }
    }
}
