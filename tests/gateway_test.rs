//! End-to-end tests for the GraphQL caching path.
//!
//! Each test drives the full router with `tower::ServiceExt::oneshot` against
//! a wiremock backend. `.expect(n)` on the mock asserts how many requests
//! actually reached the backend; wiremock verifies it when the server drops.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use serde_json::{Value, json};
use tokio::task::JoinSet;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use heimdall::auth::SignedAssertion;
use heimdall::cache::{
    CacheEntry, CacheKey, CacheStore, MemoryStore, StoreConfig, derive_key, now_millis,
};
use heimdall::{Gateway, Heimdall, router};

const QUERY: &str = r#"{"query":"query { users { id } }"}"#;
const MUTATION: &str = r#"{"query":"mutation { addUser(name: \"x\") { id } }"}"#;

// ============================================================================
// Helpers
// ============================================================================

fn endpoint(server: &MockServer) -> String {
    format!("{}/v1/graphql", server.uri())
}

fn gateway(server: &MockServer) -> Arc<Gateway> {
    Arc::new(
        Heimdall::builder()
            .endpoint(endpoint(server))
            .build()
            .unwrap(),
    )
}

fn graphql(body: &str) -> Request<Body> {
    Request::post("/v1/graphql")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn graphql_with_ttl(body: &str, ttl: &str) -> Request<Body> {
    Request::post("/v1/graphql")
        .header("content-type", "application/json")
        .header("x-cache-ttl", ttl)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

fn cache_status(response: &Response) -> &str {
    header(response, "x-cache-status").unwrap_or("-")
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn mount_data(server: &MockServer, data: Value, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": data })))
        .expect(expected)
        .mount(server)
        .await;
}

// ============================================================================
// Cache lifecycle
// ============================================================================

#[tokio::test]
async fn miss_then_hit() {
    let server = MockServer::start().await;
    mount_data(&server, json!({ "users": [{ "id": 1 }] }), 1).await;
    let gw = gateway(&server);
    let app = router(Arc::clone(&gw));

    let first = send(&app, graphql(QUERY)).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(cache_status(&first), "MISS");
    assert_eq!(header(&first, "x-cache-ttl"), Some("8"));
    assert!(header(&first, "x-gql-cache-time").is_some());
    assert!(header(&first, "x-cache-age").is_none());
    let first_body = body_json(first).await;

    gw.drain_writes().await;

    let second = send(&app, graphql(QUERY)).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(cache_status(&second), "HIT");
    assert_eq!(header(&second, "x-cache-ttl"), Some("8"));
    let age: u64 = header(&second, "x-cache-age").unwrap().parse().unwrap();
    assert!(age <= 1);
    assert_eq!(body_json(second).await, first_body);
}

#[tokio::test]
async fn expired_entry_is_refetched_and_replaced() {
    let server = MockServer::start().await;
    mount_data(&server, json!({ "users": "fresh" }), 1).await;

    let store = Arc::new(MemoryStore::new(&StoreConfig::new()));
    let gw = Arc::new(
        Heimdall::builder()
            .endpoint(endpoint(&server))
            .store(store.clone())
            .build()
            .unwrap(),
    );
    let app = router(Arc::clone(&gw));

    let stale = CacheEntry::new(
        Bytes::from_static(br#"{"data":{"users":"stale"}}"#),
        StatusCode::OK,
        HeaderMap::new(),
        8,
    )
    .stored_at(now_millis() - 20_000);
    store
        .put(derive_key("/v1/graphql", 8, QUERY.as_bytes()), stale)
        .await;

    let response = send(&app, graphql(QUERY)).await;
    assert_eq!(cache_status(&response), "EXPIRED");
    assert_eq!(body_json(response).await["data"]["users"], "fresh");

    gw.drain_writes().await;

    let response = send(&app, graphql(QUERY)).await;
    assert_eq!(cache_status(&response), "HIT");
    assert_eq!(body_json(response).await["data"]["users"], "fresh");
}

#[tokio::test]
async fn mutations_are_never_cached() {
    let server = MockServer::start().await;
    mount_data(&server, json!({ "addUser": { "id": 7 } }), 3).await;
    let store = Arc::new(MemoryStore::new(&StoreConfig::new()));
    let gw = Arc::new(
        Heimdall::builder()
            .endpoint(endpoint(&server))
            .store(store.clone())
            .build()
            .unwrap(),
    );
    let app = router(Arc::clone(&gw));

    for _ in 0..2 {
        let response = send(&app, graphql(MUTATION)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(cache_status(&response), "MUTATION");
        assert!(header(&response, "x-cache-ttl").is_none());
        gw.drain_writes().await;
    }
    let key = derive_key("/v1/graphql", 8, MUTATION.as_bytes());
    assert!(store.get(&key).await.is_none());

    // the same body sent as a query has nothing stored to hit
    let query_shaped = r#"{"query":"{ addUser { id } }"}"#;
    let response = send(&app, graphql(query_shaped)).await;
    assert_eq!(cache_status(&response), "MISS");
}

#[tokio::test]
async fn non_200_responses_are_relayed_but_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({ "errors": [{ "message": "db" }] })),
        )
        .expect(2)
        .mount(&server)
        .await;
    let gw = gateway(&server);
    let app = router(Arc::clone(&gw));

    for _ in 0..2 {
        let response = send(&app, graphql(QUERY)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(cache_status(&response), "MISS");
        assert!(header(&response, "x-gql-cache-time").is_none());
        assert_eq!(body_json(response).await["errors"][0]["message"], "db");
        gw.drain_writes().await;
    }
}

#[tokio::test]
async fn ttl_is_part_of_the_key() {
    let server = MockServer::start().await;
    mount_data(&server, json!({ "users": [] }), 2).await;
    let gw = gateway(&server);
    let app = router(Arc::clone(&gw));

    let response = send(&app, graphql_with_ttl(QUERY, "60")).await;
    assert_eq!(cache_status(&response), "MISS");
    assert_eq!(header(&response, "x-cache-ttl"), Some("60"));
    gw.drain_writes().await;

    let response = send(&app, graphql_with_ttl(QUERY, "120")).await;
    assert_eq!(cache_status(&response), "MISS");
    assert_eq!(header(&response, "x-cache-ttl"), Some("120"));
    gw.drain_writes().await;

    let response = send(&app, graphql_with_ttl(QUERY, "60")).await;
    assert_eq!(cache_status(&response), "HIT");
    assert_eq!(header(&response, "x-cache-ttl"), Some("60"));
}

#[tokio::test]
async fn ttl_below_floor_shares_the_default_key() {
    let server = MockServer::start().await;
    mount_data(&server, json!({ "users": [] }), 1).await;
    let gw = gateway(&server);
    let app = router(Arc::clone(&gw));

    let response = send(&app, graphql_with_ttl(QUERY, "3")).await;
    assert_eq!(cache_status(&response), "MISS");
    assert_eq!(header(&response, "x-cache-ttl"), Some("8"));
    gw.drain_writes().await;

    // no header and an unparseable header both resolve to the floor
    let response = send(&app, graphql(QUERY)).await;
    assert_eq!(cache_status(&response), "HIT");
    let response = send(&app, graphql_with_ttl(QUERY, "soon")).await;
    assert_eq!(cache_status(&response), "HIT");
}

#[tokio::test]
async fn different_bodies_use_different_entries() {
    let server = MockServer::start().await;
    mount_data(&server, json!({}), 2).await;
    let gw = gateway(&server);
    let app = router(Arc::clone(&gw));

    send(&app, graphql(QUERY)).await;
    gw.drain_writes().await;
    let other = send(&app, graphql(r#"{"query":"{ posts { id } }"}"#)).await;
    assert_eq!(cache_status(&other), "MISS");
}

#[tokio::test]
async fn configured_default_ttl_applies_without_header() {
    let server = MockServer::start().await;
    mount_data(&server, json!({}), 1).await;
    let gw = Arc::new(
        Heimdall::builder()
            .endpoint(endpoint(&server))
            .default_ttl(45)
            .build()
            .unwrap(),
    );
    let app = router(gw);

    let response = send(&app, graphql(QUERY)).await;
    assert_eq!(header(&response, "x-cache-ttl"), Some("45"));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn concurrent_misses_reach_backend_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": { "slow": true } }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let gw = gateway(&server);
    let app = router(Arc::clone(&gw));

    let mut tasks = JoinSet::new();
    for _ in 0..5 {
        let app = app.clone();
        tasks.spawn(async move {
            let response = app.oneshot(graphql(QUERY)).await.unwrap();
            cache_status(&response).to_string()
        });
    }
    let responses = tasks.join_all().await;
    assert!(responses.iter().all(|status| status == "MISS"));

    gw.drain_writes().await;
    let response = send(&app, graphql(QUERY)).await;
    assert_eq!(cache_status(&response), "HIT");
}

#[tokio::test]
async fn concurrent_misses_share_a_failing_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .expect(1)
        .mount(&server)
        .await;
    let gw = Arc::new(
        Heimdall::builder()
            .endpoint(endpoint(&server))
            .timeout(Duration::from_millis(300))
            .build()
            .unwrap(),
    );
    let app = router(gw);

    let started = Instant::now();
    let mut tasks = JoinSet::new();
    for _ in 0..6 {
        let app = app.clone();
        tasks.spawn(async move {
            let response = app.oneshot(graphql(QUERY)).await.unwrap();
            (response.status(), cache_status(&response).to_string())
        });
    }
    let responses = tasks.join_all().await;
    let elapsed = started.elapsed();

    for (status, cache) in responses {
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(cache, "MISS");
    }
    // one timeout for everyone, not one per queued caller
    assert!(elapsed < Duration::from_millis(1_000), "took {elapsed:?}");
}

#[tokio::test]
async fn concurrent_misses_share_an_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({ "errors": [{ "message": "db" }] }))
                .set_delay(Duration::from_millis(150)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let app = router(gateway(&server));

    let mut tasks = JoinSet::new();
    for _ in 0..4 {
        let app = app.clone();
        tasks.spawn(async move { app.oneshot(graphql(QUERY)).await.unwrap() });
    }
    for response in tasks.join_all().await {
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["errors"][0]["message"], "db");
    }
}

#[tokio::test]
async fn without_single_flight_every_miss_fetches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": {} }))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(3)
        .mount(&server)
        .await;
    let gw = Arc::new(
        Heimdall::builder()
            .endpoint(endpoint(&server))
            .single_flight(false)
            .build()
            .unwrap(),
    );
    let app = router(gw);

    let mut tasks = JoinSet::new();
    for _ in 0..3 {
        let app = app.clone();
        tasks.spawn(async move { app.oneshot(graphql(QUERY)).await.unwrap().status() });
    }
    for status in tasks.join_all().await {
        assert_eq!(status, StatusCode::OK);
    }
}

// ============================================================================
// Forwarding
// ============================================================================

#[tokio::test]
async fn proxy_headers_are_not_forwarded() {
    let server = MockServer::start().await;
    mount_data(&server, json!({}), 1).await;
    let app = router(gateway(&server));

    let request = Request::post("/v1/graphql")
        .header("content-type", "application/json")
        .header("cf-ray", "8a1b2c")
        .header("cf-connecting-ip", "203.0.113.9")
        .header("x-real-ip", "203.0.113.9")
        .header("x-forwarded-proto", "https")
        .header("x-hasura-admin-secret", "kept")
        .body(Body::from(QUERY))
        .unwrap();
    send(&app, request).await;

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let headers = &received[0].headers;
    for name in ["cf-ray", "cf-connecting-ip", "x-real-ip", "x-forwarded-proto"] {
        assert!(headers.get(name).is_none(), "{name} was forwarded");
    }
    assert_eq!(headers.get("x-hasura-admin-secret").unwrap(), "kept");
    assert_eq!(received[0].body, QUERY.as_bytes());
}

#[tokio::test]
async fn signed_mode_attaches_bearer_assertion() {
    let server = MockServer::start().await;
    mount_data(&server, json!({}), 1).await;
    let gw = Arc::new(
        Heimdall::builder()
            .endpoint(endpoint(&server))
            .backend_auth(Arc::new(SignedAssertion::new("shared-secret", "user").unwrap()))
            .build()
            .unwrap(),
    );
    let app = router(gw);

    send(&app, graphql(QUERY)).await;

    let received = server.received_requests().await.unwrap();
    let auth = received[0]
        .headers
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap();
    let token = auth.strip_prefix("Bearer ").unwrap();
    assert_eq!(token.split('.').count(), 3);
}

#[tokio::test]
async fn backend_timeout_is_a_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;
    let gw = Arc::new(
        Heimdall::builder()
            .endpoint(endpoint(&server))
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap(),
    );
    let app = router(Arc::clone(&gw));

    let response = send(&app, graphql(QUERY)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(cache_status(&response), "MISS");
    let body = body_json(response).await;
    assert!(
        body["errors"][0]["message"]
            .as_str()
            .unwrap()
            .contains("timed out")
    );
    gw.drain_writes().await;
    assert_eq!(gw.writes().pending(), 0);
}

#[tokio::test]
async fn unreachable_backend_is_a_bad_gateway() {
    let gw = Arc::new(
        Heimdall::builder()
            .endpoint("http://127.0.0.1:1/v1/graphql")
            .build()
            .unwrap(),
    );
    let app = router(gw);

    let response = send(&app, graphql(MUTATION)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(cache_status(&response), "MUTATION");
}

/// Store that blows up on lookup.
struct PanickingStore;

#[async_trait]
impl CacheStore for PanickingStore {
    async fn get(&self, _key: &CacheKey) -> Option<CacheEntry> {
        panic!("store corrupted");
    }

    async fn put(&self, _key: CacheKey, _entry: CacheEntry) {}
}

#[tokio::test]
async fn handler_panic_becomes_internal_error() {
    let server = MockServer::start().await;
    mount_data(&server, json!({}), 1).await;
    let gw = Arc::new(
        Heimdall::builder()
            .endpoint(endpoint(&server))
            .store(Arc::new(PanickingStore))
            .build()
            .unwrap(),
    );
    let app = router(gw);

    let response = send(&app, graphql(QUERY)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_json(response).await["errors"][0]["message"].is_string());

    // the router keeps serving paths that don't touch the store
    let response = send(&app, graphql(MUTATION)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// ============================================================================
// Preflight and routing
// ============================================================================

#[tokio::test]
async fn options_is_relayed_on_any_path() {
    let server = MockServer::start().await;
    for p in ["/v1/graphql", "/anything"] {
        Mock::given(method("OPTIONS"))
            .and(path(p))
            .respond_with(
                ResponseTemplate::new(204).insert_header("access-control-allow-origin", "*"),
            )
            .expect(1)
            .mount(&server)
            .await;
    }
    let app = router(gateway(&server));

    for p in ["/v1/graphql", "/anything"] {
        let request = Request::options(p)
            .header("origin", "https://app.example.com")
            .body(Body::empty())
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(cache_status(&response), "OPTIONS");
        assert_eq!(header(&response, "access-control-allow-origin"), Some("*"));
    }
}

#[tokio::test]
async fn unknown_routes_are_not_found() {
    let server = MockServer::start().await;
    let app = router(gateway(&server));

    let response = send(&app, Request::get("/v1/graphql").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, Request::post("/nope").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "not found");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn health_reports_ok() {
    let server = MockServer::start().await;
    let app = router(gateway(&server));

    let response = send(&app, Request::get("/healthz").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}
