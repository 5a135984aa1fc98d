//! Auth policy: header injection and single-flight token refresh.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use keyring::Entry;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::pipeline::{Call, Middleware};
use crate::types::Request;
use crate::{Error, Result};

/// Where the bearer token comes from.
#[derive(Clone)]
pub enum TokenSource {
    Static(String),
    /// Read from an environment variable on every dispatch.
    Env(String),
    /// OS keychain entry, with an environment-variable fallback named
    /// `{ACCOUNT}_TOKEN` (uppercased, dashes replaced).
    Keychain { service: String, account: String },
    /// Async thunk consulted on every dispatch.
    Thunk(Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>),
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::Static(_) => f.write_str("Static(..)"),
            TokenSource::Env(var) => f.debug_tuple("Env").field(var).finish(),
            TokenSource::Keychain { service, account } => f
                .debug_struct("Keychain")
                .field("service", service)
                .field("account", account)
                .finish(),
            TokenSource::Thunk(_) => f.write_str("Thunk(..)"),
        }
    }
}

impl TokenSource {
    async fn resolve(&self) -> Result<String> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Env(var) => Ok(std::env::var(var).unwrap_or_default()),
            TokenSource::Keychain { service, account } => {
                if let Ok(entry) = Entry::new(service, account) {
                    if let Ok(token) = entry.get_password() {
                        return Ok(token);
                    }
                }
                let fallback = format!("{}_TOKEN", account.to_uppercase().replace('-', "_"));
                Ok(std::env::var(fallback).unwrap_or_default())
            }
            TokenSource::Thunk(thunk) => thunk().await,
        }
    }
}

type RefreshThunk = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;
type SharedRefresh = Shared<BoxFuture<'static, Result<String>>>;

/// Auth policy configuration.
#[derive(Clone)]
pub struct AuthConfig {
    pub source: TokenSource,
    pub header: String,
    pub prefix: String,
    /// Proceed without the header when the source yields an empty token.
    pub allow_empty: bool,
    /// Called once (shared by concurrent callers) when a dispatch comes back
    /// with 401; the request is re-dispatched once with the fresh token.
    pub refresh: Option<RefreshThunk>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            source: TokenSource::Env("GQL_NET_TOKEN".to_string()),
            header: "Authorization".to_string(),
            prefix: "Bearer ".to_string(),
            allow_empty: true,
            refresh: None,
        }
    }
}

impl AuthConfig {
    pub fn new(source: TokenSource) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self::new(TokenSource::Static(token.into()))
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_allow_empty(mut self, allow: bool) -> Self {
        self.allow_empty = allow;
        self
    }

    pub fn with_refresh(
        mut self,
        refresh: impl Fn() -> BoxFuture<'static, Result<String>> + Send + Sync + 'static,
    ) -> Self {
        self.refresh = Some(Arc::new(refresh));
        self
    }
}

/// Header-injection policy with optional refresh-on-unauthorized.
///
/// The refresh is single-flight: concurrent 401s share one refresh future and
/// each re-dispatches once with the fresh token.
pub struct AuthMiddleware {
    config: AuthConfig,
    inflight: Mutex<Option<SharedRefresh>>,
}

impl AuthMiddleware {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            inflight: Mutex::new(None),
        }
    }

    /// One shared refresh at a time; the slot is cleared once it settles.
    async fn refresh_token(&self, refresh: &RefreshThunk) -> Result<String> {
        let shared = {
            let mut slot = self.inflight.lock().await;
            match slot.as_ref() {
                Some(shared) => shared.clone(),
                None => {
                    let shared = refresh().shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };
        let outcome = shared.await;
        let mut slot = self.inflight.lock().await;
        *slot = None;
        outcome
    }
}

impl Middleware for AuthMiddleware {
    fn apply(self: Arc<Self>, next: Call) -> Call {
        Arc::new(move |mut request| {
            let this = self.clone();
            let next = next.clone();
            Box::pin(async move {
                let token = this.config.source.resolve().await?;
                if token.is_empty() && !this.config.allow_empty {
                    return Err(Error::config("auth token source yielded an empty token"));
                }
                if !token.is_empty() {
                    request.insert_header(
                        this.config.header.clone(),
                        format!("{}{}", this.config.prefix, token),
                    );
                }

                let outcome = next(request.clone()).await;
                let refresh = match (&outcome, &this.config.refresh) {
                    (Err(err), Some(refresh)) if err.status() == Some(401) => refresh.clone(),
                    _ => return outcome,
                };

                warn!(request = %request.id(), "unauthorized; refreshing token");
                let fresh = this.refresh_token(&refresh).await?;
                if fresh.is_empty() {
                    if !this.config.allow_empty {
                        return Err(Error::config("token refresh yielded an empty token"));
                    }
                    request.remove_header(&this.config.header);
                } else {
                    request.insert_header(
                        this.config.header.clone(),
                        format!("{}{}", this.config.prefix, fresh),
                    );
                }
                debug!(request = %request.id(), "re-dispatching with refreshed token");
                next(request).await
            })
        })
    }
}
