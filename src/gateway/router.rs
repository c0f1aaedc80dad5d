//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::Request,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use super::auth::{KeyGate, key_gate_middleware};
use super::cors::{CorsPolicy, cors_middleware};
use super::proxy::{Upstream, no_route};

/// Shared application state
pub struct AppState {
    /// Bearer key gate (owns the token cache)
    pub gate: Arc<KeyGate>,
    /// CORS policy for API routes
    pub cors: Arc<CorsPolicy>,
    /// Upstream application, if traffic is forwarded
    pub upstream: Option<Arc<Upstream>>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let gate = Arc::clone(&state.gate);
    let cors = Arc::clone(&state.cors);

    let routes = Router::new()
        .route("/health", get(health_handler))
        .fallback(forward_handler)
        .with_state(state);

    apply_edge_layers(routes, gate, cors)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Wrap `router` with the key gate and the CORS decorator.
///
/// CORS is the outer layer: preflights are answered before the gate runs
/// and gate rejections still get CORS headers.
pub fn apply_edge_layers(router: Router, gate: Arc<KeyGate>, cors: Arc<CorsPolicy>) -> Router {
    router
        .layer(middleware::from_fn_with_state(gate, key_gate_middleware))
        .layer(middleware::from_fn_with_state(cors, cors_middleware))
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "token_cache": state.gate.cache().stats(),
    }))
}

/// Everything without a local route goes upstream
async fn forward_handler(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    match state.upstream.as_deref() {
        Some(upstream) => upstream.forward(request).await,
        None => no_route(request.uri()),
    }
}
