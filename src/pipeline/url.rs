//! Url policy: endpoint selection and extra headers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::pipeline::{Call, Middleware};
use crate::types::Request;

/// Where a request is sent: a fixed URL or a thunk over the request.
#[derive(Clone)]
pub enum EndpointSource {
    Static(String),
    Thunk(Arc<dyn Fn(&Request) -> String + Send + Sync>),
}

impl std::fmt::Debug for EndpointSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointSource::Static(url) => f.debug_tuple("Static").field(url).finish(),
            EndpointSource::Thunk(_) => f.write_str("Thunk(..)"),
        }
    }
}

/// Stateless transform setting the target URL and extra headers before the
/// core policies run. An existing per-operation URL override is respected.
pub struct UrlMiddleware {
    endpoint: EndpointSource,
    headers: HashMap<String, String>,
}

impl UrlMiddleware {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            endpoint: EndpointSource::Static(url.into()),
            headers: HashMap::new(),
        }
    }

    pub fn with_thunk(thunk: impl Fn(&Request) -> String + Send + Sync + 'static) -> Self {
        Self {
            endpoint: EndpointSource::Thunk(Arc::new(thunk)),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

impl Middleware for UrlMiddleware {
    fn apply(self: Arc<Self>, next: Call) -> Call {
        Arc::new(move |mut request| {
            let this = self.clone();
            let next = next.clone();
            Box::pin(async move {
                if request.url().is_none() {
                    let url = match &this.endpoint {
                        EndpointSource::Static(url) => url.clone(),
                        EndpointSource::Thunk(thunk) => thunk(&request),
                    };
                    request.set_url(url);
                }
                for (name, value) in &this.headers {
                    request.insert_header(name.clone(), value.clone());
                }
                next(request).await
            })
        })
    }
}
