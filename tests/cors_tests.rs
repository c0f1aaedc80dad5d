//! CORS behaviour of the edge layers

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, StatusCode, header},
    response::Response,
    routing::get,
};
use keygate::cache::TokenCache;
use keygate::config::CorsConfig;
use keygate::gateway::{CorsPolicy, KeyGate, KeyValidator, ValidationOutcome, apply_edge_layers};
use pretty_assertions::assert_eq;
use tower::ServiceExt;

struct AcceptGood;

#[async_trait]
impl KeyValidator for AcceptGood {
    async fn validate(&self, token: &str) -> ValidationOutcome {
        if token == "good" {
            ValidationOutcome::Valid
        } else {
            ValidationOutcome::Invalid("unknown key".to_string())
        }
    }
}

fn app() -> Router {
    let gate = Arc::new(KeyGate::new(
        Arc::new(AcceptGood),
        Arc::new(TokenCache::new()),
    ));
    let cors = Arc::new(CorsPolicy::from_config(&CorsConfig::default()).unwrap());

    let routes = Router::new()
        .route("/api/v1/jobs", get(|| async { "jobs" }))
        .route("/api/chat", get(|| async { "chat" }))
        .route(
            "/api/cached",
            get(|| async { ([(header::VARY, "Origin")], "cached") }),
        )
        .route("/dashboard", get(|| async { "dashboard" }));

    apply_edge_layers(routes, gate, cors)
}

async fn send(request: Request<Body>) -> Response {
    app().oneshot(request).await.unwrap()
}

fn acao(response: &Response) -> Option<&HeaderValue> {
    response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
}

#[tokio::test]
async fn test_preflight_skips_key_gate() {
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/v1/jobs")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
        .body(Body::empty())
        .unwrap();

    let response = send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(acao(&response).unwrap(), "http://localhost:3000");
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .unwrap(),
        "GET,DELETE,PATCH,POST,PUT,OPTIONS"
    );
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .unwrap(),
        "true"
    );
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_MAX_AGE).unwrap(),
        "86400"
    );
}

#[tokio::test]
async fn test_rejection_carries_cors_headers() {
    let request = Request::builder()
        .uri("/api/v1/jobs")
        .header(header::ORIGIN, "http://localhost:3001")
        .body(Body::empty())
        .unwrap();

    let response = send(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(acao(&response).unwrap(), "http://localhost:3001");
    assert_eq!(response.headers().get(header::VARY).unwrap(), "Origin");
}

#[tokio::test]
async fn test_authorized_request_carries_cors_headers() {
    let request = Request::builder()
        .uri("/api/v1/jobs")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::AUTHORIZATION, "Bearer good")
        .body(Body::empty())
        .unwrap();

    let response = send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(acao(&response).unwrap(), "http://localhost:3000");
}

#[tokio::test]
async fn test_foreign_origin_not_echoed() {
    let request = Request::builder()
        .uri("/api/chat")
        .header(header::ORIGIN, "https://evil.com")
        .body(Body::empty())
        .unwrap();

    let response = send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(acao(&response).is_none());
    assert!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .is_some()
    );
}

#[tokio::test]
async fn test_foreign_origin_preflight() {
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/v1/jobs")
        .header(header::ORIGIN, "https://evil.com")
        .body(Body::empty())
        .unwrap();

    let response = send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(acao(&response).is_none());
}

#[tokio::test]
async fn test_non_api_paths_untouched() {
    let request = Request::builder()
        .uri("/dashboard")
        .header(header::ORIGIN, "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(acao(&response).is_none());
    assert!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .is_none()
    );
}

#[tokio::test]
async fn test_downstream_vary_origin_kept_single() {
    let request = Request::builder()
        .uri("/api/cached")
        .header(header::ORIGIN, "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(acao(&response).unwrap(), "http://localhost:3000");

    let vary: Vec<_> = response.headers().get_all(header::VARY).iter().collect();
    assert_eq!(vary, vec!["Origin"]);
}
