//! Builder for configuring gateway instances

use std::sync::Arc;
use std::time::Duration;

use super::Gateway;
use crate::auth::{AllowedSources, Authorizer, BackendAuth, FixedRole, RoleResolver, WebhookAuth};
use crate::cache::{CacheStore, MemoryStore, StoreConfig, TtlPolicy};
use crate::upstream::{Backend, DEFAULT_TIMEOUT};
use crate::{HeimdallError, Result};

/// Main entry point for creating gateway instances.
pub struct Heimdall;

impl Heimdall {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> HeimdallBuilder {
        HeimdallBuilder::new()
    }
}

/// Builder for configuring gateway instances.
///
/// ```rust,no_run
/// # use heimdall::Heimdall;
/// # use heimdall::auth::AllowedSources;
/// let gateway = Heimdall::builder()
///     .endpoint("https://graphql.example.com/v1/graphql")
///     .default_ttl(30)
///     .allowed_sources(AllowedSources::from_config(&["10.0.0.1"], Some("10.0.0.0/8"))?)
///     .build()?;
/// # Ok::<(), heimdall::HeimdallError>(())
/// ```
pub struct HeimdallBuilder {
    endpoint: Option<String>,
    timeout: Duration,
    ttl: TtlPolicy,
    store: Option<Arc<dyn CacheStore>>,
    store_config: StoreConfig,
    sources: AllowedSources,
    resolver: Arc<dyn RoleResolver>,
    backend_auth: Arc<dyn BackendAuth>,
    single_flight: bool,
}

impl HeimdallBuilder {
    pub fn new() -> Self {
        Self {
            endpoint: None,
            timeout: DEFAULT_TIMEOUT,
            ttl: TtlPolicy::default(),
            store: None,
            store_config: StoreConfig::default(),
            sources: AllowedSources::permit_all(),
            resolver: Arc::new(FixedRole::default()),
            backend_auth: Arc::new(WebhookAuth),
            single_flight: true,
        }
    }

    /// GraphQL endpoint requests are forwarded to. Required.
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    /// Backend request timeout (default: 30s). A timeout is a fetch failure.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Lowest TTL a request can obtain (default: 8s).
    pub fn min_ttl(mut self, secs: u64) -> Self {
        self.ttl.min_ttl = secs;
        self
    }

    /// TTL for requests without a usable `X-Cache-TTL` (default: the floor).
    pub fn default_ttl(mut self, secs: u64) -> Self {
        self.ttl.default_ttl = secs;
        self
    }

    /// Use a custom cache store instead of the built-in in-memory one.
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Configure the built-in in-memory store. Ignored when [`store`](Self::store) is set.
    pub fn store_config(mut self, config: StoreConfig) -> Self {
        self.store_config = config;
        self
    }

    /// Addresses allowed to call the webhook (default: everyone).
    pub fn allowed_sources(mut self, sources: AllowedSources) -> Self {
        self.sources = sources;
        self
    }

    /// How webhook calls map to roles (default: always `user`).
    pub fn role_resolver(mut self, resolver: Arc<dyn RoleResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// How forwarded requests authenticate to the backend (default: webhook mode).
    pub fn backend_auth(mut self, auth: Arc<dyn BackendAuth>) -> Self {
        self.backend_auth = auth;
        self
    }

    /// Coalesce concurrent misses on the same key into one backend fetch (default: on).
    pub fn single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn build(self) -> Result<Gateway> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| HeimdallError::Configuration("backend endpoint not set".to_string()))?;
        if self.timeout.is_zero() {
            return Err(HeimdallError::Configuration(
                "backend timeout must be non-zero".to_string(),
            ));
        }

        let backend = Backend::new(&endpoint, self.timeout, self.backend_auth)?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new(&self.store_config)));
        let authorizer = Authorizer::new(self.sources, self.resolver);

        Ok(Gateway::new(
            backend,
            store,
            self.ttl,
            authorizer,
            self.single_flight,
        ))
    }
}

impl Default for HeimdallBuilder {
    fn default() -> Self {
        Self::new()
    }
}
