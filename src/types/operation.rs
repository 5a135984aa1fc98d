//! Operation value object and its wire body.

use std::collections::HashMap;

use bytes::Bytes;
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::Value;

use crate::client::CancelSignal;
use crate::{Error, Result};

/// Whether an operation reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

/// Per-call cache directives.
///
/// `force` bypasses the cache read (the fresh result is still stored);
/// `skip_batch` keeps the operation out of combined batch calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheDirectives {
    pub force: bool,
    pub skip_batch: bool,
}

/// Binary attachment for a multipart operation.
#[derive(Debug, Clone)]
pub struct Uploadable {
    /// Form field name.
    pub name: String,
    pub file_name: String,
    pub mime_type: String,
    pub content: Bytes,
}

impl Uploadable {
    pub fn new(
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            content: content.into(),
        }
    }
}

/// The wire shape of one operation. Field order is part of the contract:
/// duplicate detection inside a batch compares serialized bodies for byte
/// equality.
#[derive(Serialize)]
struct WireBody<'a> {
    id: &'a str,
    query: &'a str,
    variables: &'a Value,
}

/// Persisted wire shape: the document id stands in for the query text.
#[derive(Serialize)]
struct PersistedWireBody<'a> {
    id: &'a str,
    doc_id: &'a str,
    variables: &'a Value,
}

/// A logical query/mutation request with stable identity and variables.
///
/// Operations are built once at the call site and are read-only to every
/// policy except the auth/url policies, which may adjust headers and the
/// target URL before the core policies run.
#[derive(Debug, Clone)]
pub struct Operation {
    id: String,
    kind: OperationKind,
    query: String,
    variables: Value,
    directives: CacheDirectives,
    uploadables: Vec<Uploadable>,
    persisted: bool,
    url: Option<String>,
    headers: HashMap<String, String>,
    cancel: Option<CancelSignal>,
    body: OnceCell<String>,
}

impl Operation {
    fn new(kind: OperationKind, query: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            query: query.into(),
            variables: Value::Object(serde_json::Map::new()),
            directives: CacheDirectives::default(),
            uploadables: Vec::new(),
            persisted: false,
            url: None,
            headers: HashMap::new(),
            cancel: None,
            body: OnceCell::new(),
        }
    }

    /// A read operation. The id defaults to a fresh UUID; give queries a
    /// stable [`Operation::with_id`] when caching or deduplication matters.
    pub fn query(query: impl Into<String>) -> Self {
        Self::new(OperationKind::Query, query)
    }

    /// A write operation. Mutations bypass batching, caching, and retries
    /// unless the respective policy explicitly allows them.
    pub fn mutation(query: impl Into<String>) -> Self {
        Self::new(OperationKind::Mutation, query)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self.body = OnceCell::new();
        self
    }

    /// Replace the variables object.
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self.body = OnceCell::new();
        self
    }

    /// Insert a single variable, promoting `variables` to an object if the
    /// current value is not one.
    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        if !self.variables.is_object() {
            self.variables = Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.variables.as_object_mut() {
            map.insert(key.into(), value);
        }
        self.body = OnceCell::new();
        self
    }

    /// Request a forced refresh: the cache read is bypassed, the fresh
    /// result is still stored.
    pub fn with_force_fetch(mut self) -> Self {
        self.directives.force = true;
        self
    }

    /// Keep this operation out of combined batch calls.
    pub fn with_skip_batch(mut self) -> Self {
        self.directives.skip_batch = true;
        self
    }

    pub fn with_uploadable(mut self, uploadable: Uploadable) -> Self {
        self.uploadables.push(uploadable);
        self
    }

    /// Serialize the body with `doc_id` in place of the query text; the
    /// server is expected to know the document by its id.
    pub fn with_persisted(mut self) -> Self {
        self.persisted = true;
        self.body = OnceCell::new();
        self
    }

    /// Per-operation endpoint override.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Attach a cancellation signal; see [`crate::client::cancel_pair`].
    pub fn with_cancel(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn query_text(&self) -> &str {
        &self.query
    }

    pub fn variables(&self) -> &Value {
        &self.variables
    }

    pub fn cache_directives(&self) -> CacheDirectives {
        self.directives
    }

    pub fn is_mutation(&self) -> bool {
        self.kind == OperationKind::Mutation
    }

    /// Whether this operation carries binary attachments and must be sent as
    /// multipart/form-data.
    pub fn is_multipart(&self) -> bool {
        !self.uploadables.is_empty()
    }

    pub fn uploadables(&self) -> &[Uploadable] {
        &self.uploadables
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
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

    pub(crate) fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }

    pub fn cancel_signal(&self) -> Option<&CancelSignal> {
        self.cancel.as_ref()
    }

    /// Serialized wire body `{"id":..,"query":..,"variables":..}`, computed
    /// once and memoized. Builder methods that touch the body reset the memo.
    pub fn body(&self) -> Result<&str> {
        self.body
            .get_or_try_init(|| {
                if self.persisted {
                    serde_json::to_string(&PersistedWireBody {
                        id: &self.id,
                        doc_id: &self.id,
                        variables: &self.variables,
                    })
                } else {
                    serde_json::to_string(&WireBody {
                        id: &self.id,
                        query: &self.query,
                        variables: &self.variables,
                    })
                }
                .map_err(|e| Error::Json(e.to_string()))
            })
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_has_stable_field_order() {
        let op = Operation::query("query Q { field }")
            .with_id("Q")
            .with_variables(json!({ "b": 2, "a": 1 }));
        let body = op.body().unwrap();
        assert!(body.starts_with(r#"{"id":"Q","query":"#));
        // serde_json maps are ordered by key, so equal variables always
        // serialize identically.
        assert!(body.ends_with(r#""variables":{"a":1,"b":2}}"#));
    }

    #[test]
    fn builder_resets_memoized_body() {
        let op = Operation::query("query Q { field }").with_id("Q");
        let first = op.body().unwrap().to_string();
        let op = op.with_variables(json!({ "x": true }));
        let second = op.body().unwrap();
        assert_ne!(first, second);
        assert!(second.contains(r#""x":true"#));
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = Operation::query("query { a }");
        let b = Operation::query("query { a }");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn multipart_flag_tracks_uploadables() {
        let op = Operation::mutation("mutation Up { upload }");
        assert!(!op.is_multipart());
        let op = op.with_uploadable(Uploadable::new("file0", "a.txt", "text/plain", "hi"));
        assert!(op.is_multipart());
        assert!(op.is_mutation());
    }

    #[test]
    fn persisted_body_carries_doc_id_instead_of_query() {
        let op = Operation::query("query Q { field }")
            .with_id("Q")
            .with_variables(json!({ "a": 1 }))
            .with_persisted();
        assert!(op.is_persisted());
        let body = op.body().unwrap();
        assert_eq!(body, r#"{"id":"Q","doc_id":"Q","variables":{"a":1}}"#);
        assert!(!body.contains("field"));
    }

    #[test]
    fn with_variable_promotes_to_object() {
        let op = Operation::query("query Q { f }")
            .with_variables(json!(null))
            .with_variable("k", json!("v"));
        assert_eq!(op.variables(), &json!({ "k": "v" }));
    }
}
