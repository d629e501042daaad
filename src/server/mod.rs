//! HTTP surface.
//!
//! | Path | Method | Handler |
//! |---|---|---|
//! | `/v1/graphql` | POST | [`Gateway::handle_graphql`] |
//! | `/auth` | GET | authorization webhook |
//! | `/healthz` | GET | liveness |
//! | any | OPTIONS | [`Gateway::handle_preflight`] |
//!
//! Everything else is a 404. A panic inside a handler becomes a 500 for
//! that request only.

#[cfg(feature = "server")]
pub mod config;

use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get, post};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::{HeimdallError, telemetry};
use crate::auth::{AuthOutcome, resolve_source_ip};
use crate::gateway::{CacheStatus, Gateway, X_CACHE_STATUS};

/// GraphQL path served through the cache.
pub const GRAPHQL_PATH: &str = "/v1/graphql";
/// Authorization webhook path.
pub const AUTH_PATH: &str = "/auth";

type SharedGateway = Arc<Gateway>;

/// Build the router for `gateway`.
pub fn router(gateway: SharedGateway) -> Router {
    Router::new()
        .route(GRAPHQL_PATH, with_preflight(post(graphql)))
        .route(AUTH_PATH, with_preflight(get(auth)))
        .route("/healthz", with_preflight(get(health)))
        .fallback(fallback)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// OPTIONS goes to the backend on every path; other methods 404.
fn with_preflight(route: MethodRouter<SharedGateway>) -> MethodRouter<SharedGateway> {
    route.options(preflight).fallback(not_found)
}

async fn graphql(
    State(gateway): State<SharedGateway>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    gateway
        .handle_graphql(uri.path(), &headers, body)
        .await
        .into_response()
}

async fn auth(
    State(gateway): State<SharedGateway>,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
    request: Request,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let source_ip = resolve_source_ip(request.headers(), peer);
    let params = query
        .map(|Query(params)| params)
        .map_err(|e| HeimdallError::InvalidInput(e.body_text()));

    match gateway.authorize(source_ip.as_deref(), params) {
        AuthOutcome::Granted(decision) => Json(decision).into_response(),
        AuthOutcome::Blocked => {
            metrics::counter!(telemetry::REQUESTS_TOTAL, "status" => CacheStatus::Blocked.as_str())
                .increment(1);
            let mut response =
                (StatusCode::FORBIDDEN, Json(json!({ "error": "forbidden" }))).into_response();
            response.headers_mut().insert(
                X_CACHE_STATUS,
                HeaderValue::from_static(CacheStatus::Blocked.as_str()),
            );
            response
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn preflight(
    State(gateway): State<SharedGateway>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    gateway
        .handle_preflight(path_and_query, &headers)
        .await
        .into_response()
}

async fn fallback(
    State(gateway): State<SharedGateway>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method == Method::OPTIONS {
        preflight(State(gateway), uri, headers).await
    } else {
        not_found().await
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(detail, "request handler panicked");
    HeimdallError::Internal("request handler panicked".to_string()).into_response()
}
