//! HTTP client for the GraphQL backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode, header};
use reqwest::{Client, Url};
use tracing::{debug, warn};

use crate::auth::BackendAuth;
use crate::telemetry;
use crate::{HeimdallError, Result};

/// Default backend timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Inbound headers never forwarded: they describe the hop into the gateway,
/// not the original client request.
const PROXY_HEADERS: &[&str] = &[
    "host",
    "cf-ray",
    "cf-connecting-ip",
    "cf-visitor",
    "x-forwarded-proto",
    "x-real-ip",
    "content-length",
];

/// Connection-scoped headers, stripped in both directions.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// A buffered backend response.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub status: StatusCode,
    /// Hop-by-hop headers already removed.
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Client for the configured GraphQL endpoint.
#[derive(Clone)]
pub struct Backend {
    http: Client,
    endpoint: Url,
    timeout: Duration,
    auth: Arc<dyn BackendAuth>,
}

impl Backend {
    pub fn new(endpoint: &str, timeout: Duration, auth: Arc<dyn BackendAuth>) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            HeimdallError::Configuration(format!("invalid backend endpoint {endpoint:?}: {e}"))
        })?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                HeimdallError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            http,
            endpoint,
            timeout,
            auth,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Upper bound on one backend call, body download included.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST a GraphQL body to the endpoint.
    pub async fn post_graphql(&self, inbound: &HeaderMap, body: Bytes) -> Result<BackendResponse> {
        self.send(Method::POST, self.endpoint.clone(), inbound, Some(body)).await
    }

    /// Relay a CORS preflight. `path_and_query` replaces the endpoint's own
    /// path so preflights for any gateway path reach the same place on the
    /// backend origin.
    pub async fn preflight(
        &self,
        path_and_query: &str,
        inbound: &HeaderMap,
    ) -> Result<BackendResponse> {
        let url = self.endpoint.join(path_and_query).map_err(|e| {
            HeimdallError::InvalidInput(format!("bad preflight path {path_and_query:?}: {e}"))
        })?;
        self.send(Method::OPTIONS, url, inbound, None).await
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        inbound: &HeaderMap,
        body: Option<Bytes>,
    ) -> Result<BackendResponse> {
        let mut headers = forwardable_headers(inbound);
        self.auth.apply(&mut headers)?;

        debug!(%method, %url, auth = self.auth.name(), "forwarding to backend");
        let started = Instant::now();
        let mut request = self.http.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }

        let result = self.read(request).await;
        metrics::histogram!(telemetry::BACKEND_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        let outcome = match &result {
            Ok(response) if response.status.is_success() => "ok",
            Ok(_) => "error_status",
            Err(HeimdallError::Timeout(_)) => "timeout",
            Err(_) => "transport_error",
        };
        metrics::counter!(telemetry::BACKEND_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
        if let Err(e) = &result {
            warn!(error = %e, "backend request failed");
        }
        result
    }

    async fn read(&self, request: reqwest::RequestBuilder) -> Result<BackendResponse> {
        let response = request.send().await.map_err(|e| self.classify_error(e))?;
        let status = response.status();
        let mut headers = response.headers().clone();
        strip(&mut headers, HOP_BY_HOP);
        headers.remove(header::CONTENT_LENGTH);
        let body = response.bytes().await.map_err(|e| self.classify_error(e))?;
        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }

    fn classify_error(&self, err: reqwest::Error) -> HeimdallError {
        if err.is_timeout() {
            HeimdallError::Timeout(self.timeout)
        } else {
            HeimdallError::from(err)
        }
    }
}

/// Copy of `inbound` without proxy-identifying and hop-by-hop headers.
pub fn forwardable_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = inbound.clone();
    strip(&mut headers, PROXY_HEADERS);
    strip(&mut headers, HOP_BY_HOP);
    headers
}

fn strip(headers: &mut HeaderMap, names: &[&str]) {
    for name in names {
        headers.remove(*name);
    }
}
