use std::sync::Arc;

use crate::client::GqlClient;
use crate::pipeline::{
    self, AuthConfig, AuthMiddleware, BatchConfig, BatchMiddleware, CacheConfig, CacheMiddleware,
    GraphqlErrorLogger, LoggingMiddleware, Middleware, PersistedQueriesMiddleware, Policy,
    RetryConfig, RetryMiddleware, UrlMiddleware,
};
use crate::transport::{HttpTransport, Transport};
use crate::{Error, Result};

/// Builder for [`GqlClient`].
///
/// Policies run in the order they are added: the first added is the
/// outermost wrapper. The conventional order puts batching outermost, then
/// cache, then retry, so cached hits skip batching windows and retries stay
/// inside a single batch member.
pub struct GqlClientBuilder {
    endpoint: Option<String>,
    policies: Vec<Policy>,
    no_throw: bool,
    transport: Option<Arc<dyn Transport>>,
}

impl Default for GqlClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GqlClientBuilder {
    pub fn new() -> Self {
        Self {
            endpoint: None,
            policies: Vec::new(),
            no_throw: false,
            transport: None,
        }
    }

    /// Target endpoint; validated at build time.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Append one policy slot (any stage).
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    fn request_policy(self, middleware: impl Middleware + 'static) -> Self {
        self.policy(Policy::Request(Arc::new(middleware)))
    }

    pub fn with_batch(self, config: BatchConfig) -> Self {
        self.request_policy(BatchMiddleware::new(config))
    }

    pub fn with_cache(self, config: CacheConfig) -> Self {
        self.request_policy(CacheMiddleware::new(config))
    }

    pub fn with_retry(self, config: RetryConfig) -> Self {
        self.request_policy(RetryMiddleware::new(config))
    }

    pub fn with_auth(self, config: AuthConfig) -> Self {
        self.request_policy(AuthMiddleware::new(config))
    }

    pub fn with_url(self, middleware: UrlMiddleware) -> Self {
        self.request_policy(middleware)
    }

    /// Dispatch persisted document ids, falling back to full query text when
    /// the server rejects them.
    pub fn with_persisted_queries(self) -> Self {
        self.request_policy(PersistedQueriesMiddleware::new())
    }

    pub fn with_logging(self) -> Self {
        self.request_policy(LoggingMiddleware::new())
    }

    pub fn with_graphql_error_logging(self) -> Self {
        self.request_policy(GraphqlErrorLogger::new())
    }

    /// Return non-successful responses as-is instead of converting them into
    /// errors in the final check.
    pub fn no_throw(mut self, no_throw: bool) -> Self {
        self.no_throw = no_throw;
        self
    }

    /// Substitute the terminal transport; mainly for tests.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<GqlClient> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| Error::config("client endpoint is required"))?;
        url::Url::parse(&endpoint)
            .map_err(|e| Error::config(format!("invalid endpoint `{endpoint}`: {e}")))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(endpoint.clone())?),
        };
        let (preflights, chain) = pipeline::assemble(self.policies, transport);
        Ok(GqlClient::assembled(preflights, chain, self.no_throw))
    }
}
