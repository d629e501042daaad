//! The caching gateway.
//!
//! [`Gateway`] owns everything a request needs: the backend client, the
//! cache store, the TTL policy, the webhook authorizer and the background
//! write tracker. It is built once by [`HeimdallBuilder`] and shared behind
//! an `Arc` by the HTTP layer.
//!
//! Per GraphQL request:
//!
//! ```text
//! classify ── mutation ──> forward ─────────────────────────> MUTATION
//!    └─ query ─> derive key ─> lookup ─ fresh ───────────────> HIT
//!                                └─ absent/expired ─> fetch ─ 200 ─> store (background), MISS/EXPIRED
//!                                                      └─ other/failure ─> relay, MISS/EXPIRED
//! ```

mod background;
mod builder;
mod inflight;

pub use background::BackgroundWrites;
pub use builder::{Heimdall, HeimdallBuilder};
pub use inflight::{Flight, FlightFollower, FlightLeader, InflightFetches};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::auth::{AuthOutcome, Authorizer};
use crate::cache::{
    CacheEntry, CacheKey, CacheStore, Freshness, TtlPolicy, derive_key, evaluate, now_millis,
};
use crate::classify::classify;
use crate::upstream::{Backend, BackendResponse};
use crate::{HeimdallError, Result, telemetry};

/// Cache outcome reported to clients.
pub const X_CACHE_STATUS: HeaderName = HeaderName::from_static("x-cache-status");
/// Age in seconds of a served entry (hits only).
pub const X_CACHE_AGE: HeaderName = HeaderName::from_static("x-cache-age");
/// Inbound: requested TTL. Outbound: TTL applied.
pub const X_CACHE_TTL: HeaderName = HeaderName::from_static("x-cache-ttl");
/// Epoch milliseconds at which the served/stored entry was captured.
pub const X_GQL_CACHE_TIME: HeaderName = HeaderName::from_static("x-gql-cache-time");

/// Slack on top of the backend timeout before a follower gives up on its leader.
const FOLLOWER_GRACE: Duration = Duration::from_millis(250);

/// Value of the `X-Cache-Status` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Expired,
    Mutation,
    Options,
    Blocked,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Expired => "EXPIRED",
            CacheStatus::Mutation => "MUTATION",
            CacheStatus::Options => "OPTIONS",
            CacheStatus::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A response ready to go back to the client.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GatewayResponse {
    fn relay(backend: BackendResponse) -> Self {
        Self {
            status: backend.status,
            headers: backend.headers,
            body: backend.body,
        }
    }

    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            status: entry.status,
            headers: entry.headers.clone(),
            body: entry.payload.clone(),
        }
    }

    /// Render a gateway-side failure the way [`HeimdallError`] renders itself.
    fn from_error(err: &HeimdallError) -> Self {
        let body = serde_json::json!({ "errors": [{ "message": err.to_string() }] });
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            status: err.status_code(),
            headers,
            body: Bytes::from(body.to_string()),
        }
    }

    /// The `X-Cache-Status` value, if set.
    pub fn cache_status(&self) -> Option<&str> {
        self.headers.get(X_CACHE_STATUS)?.to_str().ok()
    }

    fn annotate(mut self, status: CacheStatus) -> Self {
        self.headers
            .insert(X_CACHE_STATUS, HeaderValue::from_static(status.as_str()));
        metrics::counter!(telemetry::REQUESTS_TOTAL, "status" => status.as_str()).increment(1);
        self
    }

    fn with_number(mut self, name: HeaderName, value: u64) -> Self {
        self.headers.insert(name, HeaderValue::from(value));
        self
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Result of consulting the store for a key.
enum Lookup {
    Fresh(CacheEntry, Freshness),
    Expired,
    Absent,
}

/// Caching gateway in front of one GraphQL backend.
pub struct Gateway {
    backend: Backend,
    store: Arc<dyn CacheStore>,
    ttl: TtlPolicy,
    authorizer: Authorizer,
    writes: BackgroundWrites,
    inflight: Option<InflightFetches<GatewayResponse>>,
}

impl Gateway {
    pub(crate) fn new(
        backend: Backend,
        store: Arc<dyn CacheStore>,
        ttl: TtlPolicy,
        authorizer: Authorizer,
        single_flight: bool,
    ) -> Self {
        Self {
            backend,
            store,
            ttl,
            authorizer,
            writes: BackgroundWrites::new(),
            inflight: single_flight.then(InflightFetches::new),
        }
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        self.ttl
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Handle to the background write tracker.
    pub fn writes(&self) -> &BackgroundWrites {
        &self.writes
    }

    /// Wait for all outstanding cache writes. Call before shutting down.
    pub async fn drain_writes(&self) {
        self.writes.drain().await;
    }

    /// Serve a GraphQL POST.
    pub async fn handle_graphql(
        &self,
        path: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> GatewayResponse {
        if classify(&body).is_mutation() {
            debug!(path, "mutation, bypassing cache");
            return self.forward(headers, body).await.annotate(CacheStatus::Mutation);
        }

        let requested = headers.get(X_CACHE_TTL).and_then(|v| v.to_str().ok());
        let ttl = self.ttl.effective(requested);
        let key = derive_key(path, ttl, &body);

        let status = match self.lookup(&key, ttl).await {
            Lookup::Fresh(entry, freshness) => return serve_hit(&entry, freshness, ttl),
            Lookup::Expired => CacheStatus::Expired,
            Lookup::Absent => CacheStatus::Miss,
        };

        let response = match self.inflight.as_ref().map(|flights| flights.join(&key)) {
            Some(Flight::Follower(follower)) => {
                match follower.outcome(self.follower_wait()).await {
                    Some(shared) => {
                        debug!(cache_key = %key, "joined in-flight fetch");
                        shared
                    }
                    None => self.fetch(key, headers, body, ttl, None).await,
                }
            }
            Some(Flight::Leader(leader)) => {
                // a previous flight may have stored the entry since our lookup
                if let Lookup::Fresh(entry, freshness) = self.lookup(&key, ttl).await {
                    leader.publish(
                        GatewayResponse::from_entry(&entry)
                            .with_number(X_GQL_CACHE_TIME, entry.stored_at_ms),
                    );
                    return serve_hit(&entry, freshness, ttl);
                }
                self.fetch(key, headers, body, ttl, Some(leader)).await
            }
            None => self.fetch(key, headers, body, ttl, None).await,
        };
        response.with_number(X_CACHE_TTL, ttl).annotate(status)
    }

    /// Relay a CORS preflight to the backend. Never cached.
    pub async fn handle_preflight(
        &self,
        path_and_query: &str,
        headers: &HeaderMap,
    ) -> GatewayResponse {
        let response = match self.backend.preflight(path_and_query, headers).await {
            Ok(response) => GatewayResponse::relay(response),
            Err(e) => GatewayResponse::from_error(&e),
        };
        response.annotate(CacheStatus::Options)
    }

    /// Decide an authorization webhook call.
    pub fn authorize(
        &self,
        source_ip: Option<&str>,
        params: Result<HashMap<String, String>>,
    ) -> AuthOutcome {
        self.authorizer.authorize(source_ip, params)
    }

    /// Fetch from the backend, store a 200 in the background and publish the
    /// outcome to any followers of `leader`.
    async fn fetch(
        &self,
        key: CacheKey,
        headers: &HeaderMap,
        body: Bytes,
        ttl: u64,
        leader: Option<FlightLeader<GatewayResponse>>,
    ) -> GatewayResponse {
        let response = match self.backend.post_graphql(headers, body).await {
            Ok(response) if response.status == StatusCode::OK => {
                let entry = CacheEntry::new(
                    response.body.clone(),
                    response.status,
                    response.headers.clone(),
                    ttl,
                );
                let response = GatewayResponse::relay(response)
                    .with_number(X_GQL_CACHE_TIME, entry.stored_at_ms);
                if let Some(leader) = &leader {
                    leader.publish(response.clone());
                }
                let store = Arc::clone(&self.store);
                debug!(cache_key = %key, ttl, "storing backend response");
                self.writes.spawn(async move {
                    store.put(key, entry).await;
                    metrics::counter!(telemetry::CACHE_WRITES_TOTAL).increment(1);
                    // latecomers keep joining the flight until the entry is readable
                    drop(leader);
                });
                return response;
            }
            Ok(response) => {
                debug!(cache_key = %key, status = %response.status, "not caching non-200 response");
                GatewayResponse::relay(response)
            }
            Err(e) => GatewayResponse::from_error(&e),
        };
        if let Some(leader) = leader {
            leader.publish(response.clone());
        }
        response
    }

    /// How long a follower waits for its leader before fetching itself.
    fn follower_wait(&self) -> Duration {
        self.backend.timeout().saturating_add(FOLLOWER_GRACE)
    }

    async fn forward(&self, headers: &HeaderMap, body: Bytes) -> GatewayResponse {
        match self.backend.post_graphql(headers, body).await {
            Ok(response) => GatewayResponse::relay(response),
            Err(e) => GatewayResponse::from_error(&e),
        }
    }

    async fn lookup(&self, key: &CacheKey, ttl: u64) -> Lookup {
        let Some(entry) = self.store.get(key).await else {
            return Lookup::Absent;
        };
        match evaluate(&entry, ttl, now_millis()) {
            fresh @ Freshness::Hit { .. } => Lookup::Fresh(entry, fresh),
            Freshness::Expired { age } => {
                debug!(cache_key = %key, age, "cached entry expired");
                Lookup::Expired
            }
        }
    }
}

fn serve_hit(entry: &CacheEntry, freshness: Freshness, requested_ttl: u64) -> GatewayResponse {
    let ttl = match entry.ttl_secs {
        Some(ttl) if ttl > 0 => ttl,
        _ => requested_ttl,
    };
    GatewayResponse::from_entry(entry)
        .with_number(X_CACHE_AGE, freshness.age())
        .with_number(X_CACHE_TTL, ttl)
        .with_number(X_GQL_CACHE_TIME, entry.stored_at_ms)
        .annotate(CacheStatus::Hit)
}
