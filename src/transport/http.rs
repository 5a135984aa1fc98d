use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use tracing::debug;

use crate::transport::{Transport, WireResponse};
use crate::types::Request;
use crate::{Error, Result};

/// HTTP transport over a pooled reqwest client.
///
/// Knows three dispatch shapes: a single JSON body, a combined batch body
/// (one JSON array), and multipart/form-data for operations carrying
/// uploadables. Requests with a cancellation signal race the exchange against
/// the caller's handle.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Build a transport targeting `endpoint`. Per-request URL overrides
    /// (url policy, batch endpoint) take precedence over it.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(Error::from)?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Reuse an externally configured reqwest client.
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    fn build(&self, request: &Request) -> Result<reqwest::RequestBuilder> {
        let url = request.url().unwrap_or(&self.endpoint);
        let mut builder = self.client.post(url).header("Accept", "*/*");

        match request {
            Request::Single(op) if op.is_multipart() => {
                // id/query/variables as text fields, one part per attachment.
                let mut form = multipart::Form::new()
                    .text("id", op.id().to_string())
                    .text("query", op.query_text().to_string())
                    .text(
                        "variables",
                        serde_json::to_string(op.variables())
                            .map_err(|e| Error::Json(e.to_string()))?,
                    );
                for uploadable in op.uploadables() {
                    let part = multipart::Part::bytes(uploadable.content.to_vec())
                        .file_name(uploadable.file_name.clone())
                        .mime_str(&uploadable.mime_type)
                        .map_err(Error::from)?;
                    form = form.part(uploadable.name.clone(), part);
                }
                builder = builder.multipart(form);
            }
            _ => {
                builder = builder
                    .header("Content-Type", "application/json")
                    .body(request.body()?);
            }
        }

        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }
        Ok(builder)
    }

    async fn exchange(&self, request: &Request) -> Result<WireResponse> {
        let response = self.build(request)?.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;
        debug!(
            request = %request.id(),
            http_status = status,
            bytes = body.len(),
            "wire response received"
        );
        Ok(WireResponse {
            status,
            url,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &Request) -> Result<WireResponse> {
        match request.cancel_signal() {
            Some(signal) => {
                tokio::select! {
                    outcome = self.exchange(request) => outcome,
                    _ = signal.cancelled() => {
                        debug!(request = %request.id(), "transport call aborted by caller");
                        Err(Error::aborted("transport call cancelled by caller"))
                    }
                }
            }
            None => self.exchange(request).await,
        }
    }
}
