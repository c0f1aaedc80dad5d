//! CORS headers for API routes
//!
//! Every response under the API prefix gets the same CORS headers whatever
//! the key gate decided, so browsers can read error bodies too. The request
//! `Origin` is echoed back only when it is on the allow-list; the wildcard
//! origin is never sent because credentials are allowed. Preflight `OPTIONS`
//! requests are answered here and never reach the key gate.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::trace;

use crate::config::CorsConfig;
use crate::{Error, Result};

const ALLOW_METHODS: &str = "GET,DELETE,PATCH,POST,PUT,OPTIONS";

/// Resolved CORS policy with header values prepared up front
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    path_prefix: String,
    allowed_origins: Vec<HeaderValue>,
    allow_headers: HeaderValue,
    max_age: HeaderValue,
}

impl CorsPolicy {
    /// Build the policy from `CorsConfig`
    pub fn from_config(config: &CorsConfig) -> Result<Self> {
        let allowed_origins = config
            .allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin)
                    .map_err(|e| Error::Config(format!("Invalid CORS origin '{origin}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let allow_headers = HeaderValue::from_str(&config.allowed_headers.join(", "))
            .map_err(|e| Error::Config(format!("Invalid CORS allowed_headers: {e}")))?;

        Ok(Self {
            path_prefix: config.path_prefix.clone(),
            allowed_origins,
            allow_headers,
            max_age: HeaderValue::from(config.max_age.as_secs()),
        })
    }

    /// Whether responses for `path` receive CORS headers
    #[must_use]
    pub fn applies_to(&self, path: &str) -> bool {
        path.starts_with(&self.path_prefix)
    }

    /// Return the origin to echo back, if it is allowed
    #[must_use]
    pub fn allowed_origin<'a>(&self, origin: Option<&'a HeaderValue>) -> Option<&'a HeaderValue> {
        origin.filter(|o| self.allowed_origins.iter().any(|allowed| allowed == *o))
    }

    /// Write the CORS headers for a request with `origin` into `headers`
    pub fn apply(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        if let Some(origin) = self.allowed_origin(origin) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
            if !varies_on_origin(headers) {
                headers.append(header::VARY, HeaderValue::from_static("Origin"));
            }
        } else {
            headers.remove(header::ACCESS_CONTROL_ALLOW_ORIGIN);
        }

        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            self.allow_headers.clone(),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
    }
}

/// Whether an existing `Vary` header already covers `Origin`
fn varies_on_origin(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::VARY)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|name| name == "*" || name.eq_ignore_ascii_case("origin"))
}

/// CORS middleware.
///
/// Must wrap the key gate so that preflights short-circuit before it and
/// 401 responses are decorated after it.
pub async fn cors_middleware(
    State(policy): State<Arc<CorsPolicy>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !policy.applies_to(request.uri().path()) {
        return next.run(request).await;
    }

    let origin = request.headers().get(header::ORIGIN).cloned();

    let mut response = if request.method() == Method::OPTIONS {
        trace!(path = %request.uri().path(), "Answering CORS preflight");
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    policy.apply(origin.as_ref(), response.headers_mut());
    response
}
