//! Response cache policy over the bounded TTL store.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::{CacheKey, ResponseCache};
use crate::pipeline::{Call, Middleware};
use crate::types::{Request, Response};
use crate::Result;

/// Cache policy configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl: Duration,
    /// Cache mutation results instead of bypassing them.
    pub allow_mutations: bool,
    pub allow_multipart: bool,
    /// Drop the whole store on every mutation, a conservative invalidation
    /// strategy.
    pub clear_on_mutation: bool,
    /// Store responses that carry GraphQL errors.
    pub cache_errors: bool,
    /// A hit restarts the entry's TTL clock.
    pub refresh_ttl_on_read: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            ttl: Duration::from_secs(15 * 60),
            allow_mutations: false,
            allow_multipart: false,
            clear_on_mutation: false,
            cache_errors: false,
            refresh_ttl_on_read: false,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_allow_mutations(mut self, allow: bool) -> Self {
        self.allow_mutations = allow;
        self
    }

    pub fn with_allow_multipart(mut self, allow: bool) -> Self {
        self.allow_multipart = allow;
        self
    }

    pub fn with_clear_on_mutation(mut self, clear: bool) -> Self {
        self.clear_on_mutation = clear;
        self
    }

    pub fn with_cache_errors(mut self, cache: bool) -> Self {
        self.cache_errors = cache;
        self
    }

    pub fn with_refresh_ttl_on_read(mut self, refresh: bool) -> Self {
        self.refresh_ttl_on_read = refresh;
        self
    }
}

/// Memoization policy keyed by `(operation id, variables)`.
///
/// Combined batch envelopes pass straight through: only single operations
/// have a cacheable identity. A `force` directive bypasses the read but the
/// fresh result is still stored. `Err` outcomes are never stored.
pub struct CacheMiddleware {
    config: CacheConfig,
    store: Arc<ResponseCache>,
}

impl CacheMiddleware {
    pub fn new(config: CacheConfig) -> Self {
        let store = Arc::new(ResponseCache::new(config.max_entries, config.ttl));
        Self { config, store }
    }

    /// Share an existing store between policies (or hold it for inspection).
    pub fn with_store(config: CacheConfig, store: Arc<ResponseCache>) -> Self {
        Self { config, store }
    }

    pub fn store(&self) -> Arc<ResponseCache> {
        self.store.clone()
    }

    fn storable(&self, response: &Response) -> bool {
        response.errors().is_empty() || self.config.cache_errors
    }

    async fn fetch_and_store(&self, key: CacheKey, request: Request, next: &Call) -> Result<Response> {
        let response = next(request).await?;
        if self.storable(&response) {
            self.store.put(key, response.clone()).await;
        }
        Ok(response)
    }
}

impl Middleware for CacheMiddleware {
    fn apply(self: Arc<Self>, next: Call) -> Call {
        Arc::new(move |request| {
            let this = self.clone();
            let next = next.clone();
            Box::pin(async move {
                let operation = match &request {
                    Request::Single(op) => op,
                    // A combined envelope has no single cache identity.
                    Request::Batch(_) => return next(request).await,
                };

                if operation.is_mutation() {
                    if this.config.clear_on_mutation {
                        debug!(operation = %operation.id(), "mutation clears the response cache");
                        this.store.clear().await;
                    }
                    if !this.config.allow_mutations {
                        return next(request).await;
                    }
                }
                if operation.is_multipart() && !this.config.allow_multipart {
                    return next(request).await;
                }

                let key = CacheKey::new(operation.id(), operation.variables())?;
                if operation.cache_directives().force {
                    return this.fetch_and_store(key, request, &next).await;
                }

                if let Some(hit) = this.store.get(&key, this.config.refresh_ttl_on_read).await {
                    debug!(operation = %operation.id(), "cache hit");
                    return Ok(hit);
                }
                this.fetch_and_store(key, request, &next).await
            })
        })
    }
}
