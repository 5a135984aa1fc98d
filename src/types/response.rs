//! Normalized responses and the GraphQL error shapes they carry.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transport::WireResponse;
use crate::{Error, Result};

/// Source position reported by the server for one GraphQL error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub line: u32,
    pub column: u32,
}

/// One error entry from a GraphQL response's `errors` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<ErrorLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Value>,
}

/// Normalized result of one dispatch.
///
/// A response is *successful* iff the status is in the 2xx range, the error
/// list is empty, and `data` is present. Anything else is a failure condition
/// surfaced by the client's final check (unless `no_throw` is set).
///
/// Cloning produces an independent copy sharing no mutable sub-state, so the
/// batch coordinator can hand each member its own view of a combined result.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    ok: bool,
    url: String,
    headers: HashMap<String, String>,
    body: Bytes,
    text: OnceCell<String>,
    json: Option<Value>,
    data: Option<Value>,
    errors: Vec<GraphqlError>,
}

impl Response {
    /// Normalize a wire response. 2xx bodies must decode as JSON; failing
    /// statuses keep their body as raw text only.
    pub(crate) fn from_wire(wire: WireResponse) -> Result<Self> {
        let ok = (200..300).contains(&wire.status);
        let mut response = Self {
            status: wire.status,
            ok,
            url: wire.url,
            headers: wire.headers,
            body: wire.body,
            text: OnceCell::new(),
            json: None,
            data: None,
            errors: Vec::new(),
        };
        if ok {
            let payload: Value = serde_json::from_slice(&response.body)
                .map_err(|e| Error::Json(e.to_string()))?;
            response.apply_payload(&payload);
        }
        Ok(response)
    }

    /// A ready response built directly from a GraphQL payload, bypassing the
    /// network entirely. Useful for preflight short-circuits and tests.
    pub fn from_graphql(payload: Value) -> Self {
        let mut response = Self {
            status: 200,
            ok: true,
            url: String::new(),
            headers: HashMap::new(),
            body: Bytes::new(),
            text: OnceCell::new(),
            json: None,
            data: None,
            errors: Vec::new(),
        };
        response.apply_payload(&payload);
        response
    }

    /// Install a member payload: `data`/`errors` are taken from the payload
    /// (tolerating an extra `payload` wrapper object used by some servers).
    fn apply_payload(&mut self, payload: &Value) {
        let payload = match payload.get("payload") {
            Some(inner) if inner.is_object() => inner,
            _ => payload,
        };
        self.data = payload.get("data").filter(|d| !d.is_null()).cloned();
        self.errors = payload
            .get("errors")
            .and_then(|e| serde_json::from_value(e.clone()).ok())
            .unwrap_or_default();
        self.json = Some(payload.clone());
    }

    /// Reconstruct an individual member response from this combined response:
    /// same status/headers metadata, that member's payload.
    pub(crate) fn for_member(&self, payload: &Value) -> Response {
        let mut member = self.clone();
        member.text = OnceCell::new();
        member.apply_payload(payload);
        member
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether the HTTP status is in the success range. Says nothing about
    /// GraphQL-level errors; see [`Response::is_success`].
    pub fn ok(&self) -> bool {
        self.ok
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// The parsed JSON payload, when the body decoded as JSON.
    pub fn json(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn errors(&self) -> &[GraphqlError] {
        &self.errors
    }

    /// Raw body text, decoded at most once and memoized.
    pub fn raw_text(&self) -> &str {
        self.text
            .get_or_init(|| String::from_utf8_lossy(&self.body).into_owned())
    }

    /// Status in range, no errors, data present.
    pub fn is_success(&self) -> bool {
        self.ok && self.errors.is_empty() && self.data.is_some()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Response:")?;
        writeln!(f, "   Url: {}", self.url)?;
        writeln!(f, "   Status code: {}", self.status)?;
        writeln!(
            f,
            "   Response headers: {}",
            serde_json::to_string(&self.headers).unwrap_or_default()
        )?;
        write!(
            f,
            "   Response body: {}",
            self.json
                .as_ref()
                .and_then(|j| serde_json::to_string(j).ok())
                .unwrap_or_default()
        )
    }
}

/// Render a server error list for humans: numbered messages, each location
/// annotated with a caret-marked excerpt of the query text.
pub(crate) fn format_graphql_errors(query: &str, errors: &[GraphqlError]) -> String {
    const CONTEXT_BEFORE: usize = 20;
    const CONTEXT_LENGTH: usize = 60;

    let query_lines: Vec<&str> = query.split('\n').collect();
    errors
        .iter()
        .enumerate()
        .map(|(ii, error)| {
            let prefix = format!("{}. ", ii + 1);
            let indent = " ".repeat(prefix.len());
            let mut rendered = format!("{}{}", prefix, error.message);
            for loc in &error.locations {
                let line_idx = (loc.line as usize).saturating_sub(1);
                let Some(query_line) = query_lines.get(line_idx) else {
                    continue;
                };
                let column = (loc.column as usize).saturating_sub(1);
                let offset = column.min(CONTEXT_BEFORE);
                let excerpt: String = query_line
                    .chars()
                    .skip(column - offset)
                    .take(CONTEXT_LENGTH)
                    .collect();
                rendered.push_str(&format!(
                    "\n{}{}\n{}{}^^^",
                    indent,
                    excerpt,
                    indent,
                    " ".repeat(offset)
                ));
            }
            rendered
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
pub(crate) fn fake_response(status: u16, payload: Value) -> Response {
    let body = serde_json::to_vec(&payload).unwrap();
    Response::from_wire(WireResponse {
        status,
        url: "http://fake.test/graphql".to_string(),
        headers: HashMap::new(),
        body: Bytes::from(body),
    })
    .unwrap_or_else(|_| {
        // Failing statuses skip JSON parsing entirely.
        Response::from_wire(WireResponse {
            status,
            url: "http://fake.test/graphql".to_string(),
            headers: HashMap::new(),
            body: Bytes::new(),
        })
        .unwrap()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wire(status: u16, body: &str) -> WireResponse {
        WireResponse {
            status,
            url: "http://localhost/graphql".to_string(),
            headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn success_body_is_parsed() {
        let res = Response::from_wire(wire(200, r#"{"data":{"me":{"name":"a"}}}"#)).unwrap();
        assert!(res.ok());
        assert!(res.is_success());
        assert_eq!(res.data().unwrap()["me"]["name"], json!("a"));
        assert!(res.errors().is_empty());
    }

    #[test]
    fn graphql_errors_defeat_success() {
        let res =
            Response::from_wire(wire(200, r#"{"data":null,"errors":[{"message":"boom"}]}"#))
                .unwrap();
        assert!(res.ok());
        assert!(!res.is_success());
        assert_eq!(res.errors()[0].message, "boom");
        assert!(res.data().is_none());
    }

    #[test]
    fn failing_status_keeps_raw_text_only() {
        let res = Response::from_wire(wire(503, "service melting")).unwrap();
        assert!(!res.ok());
        assert_eq!(res.status(), 503);
        assert!(res.json().is_none());
        assert_eq!(res.raw_text(), "service melting");
    }

    #[test]
    fn invalid_json_on_success_status_is_a_protocol_error() {
        let err = Response::from_wire(wire(200, "<html>nope</html>")).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn member_reconstruction_unwraps_payload_envelopes() {
        let combined = Response::from_wire(wire(
            200,
            r#"[{"payload":{"data":{"n":1}}},{"data":{"n":2}}]"#,
        ))
        .unwrap();
        let items = combined.json().unwrap().as_array().unwrap().clone();

        let first = combined.for_member(&items[0]);
        let second = combined.for_member(&items[1]);
        assert_eq!(first.data().unwrap()["n"], json!(1));
        assert_eq!(second.data().unwrap()["n"], json!(2));
        assert_eq!(first.status(), 200);
    }

    #[test]
    fn member_copies_share_no_state() {
        let combined =
            Response::from_wire(wire(200, r#"[{"data":{"n":1}},{"data":{"n":2}}]"#)).unwrap();
        let items = combined.json().unwrap().as_array().unwrap().clone();
        let first = combined.for_member(&items[0]);
        // The member sees its own payload, the combined response still sees
        // the full array.
        assert_eq!(first.json().unwrap()["data"]["n"], json!(1));
        assert!(combined.json().unwrap().is_array());
    }

    #[test]
    fn ready_responses_report_success() {
        let res = Response::from_graphql(json!({ "data": { "ok": true } }));
        assert!(res.is_success());
        assert_eq!(res.status(), 200);
    }

    #[test]
    fn error_formatting_marks_locations() {
        let errors = vec![GraphqlError {
            message: "Unknown field `nmae`".to_string(),
            locations: vec![ErrorLocation { line: 1, column: 18 }],
            path: None,
        }];
        let rendered = format_graphql_errors("query Me { me { nmae } }", &errors);
        assert!(rendered.starts_with("1. Unknown field `nmae`"));
        assert!(rendered.contains("^^^"));
        assert!(rendered.contains("nmae"));
    }

    #[test]
    fn error_formatting_survives_out_of_range_locations() {
        let errors = vec![GraphqlError {
            message: "bad location".to_string(),
            locations: vec![ErrorLocation {
                line: 99,
                column: 1,
            }],
            path: None,
        }];
        let rendered = format_graphql_errors("query Q { f }", &errors);
        assert_eq!(rendered, "1. bad location");
    }
}
