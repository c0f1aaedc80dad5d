//! API key gate for the protected route prefix
//!
//! Every request under the protected prefix (default `/api/v1/`) must carry
//! `Authorization: Bearer <token>`. Tokens are checked against the
//! [`TokenCache`] first and only sent to the [`KeyValidator`] on a miss.
//! Successful validations are cached for the configured TTL; failures are
//! never cached. `OPTIONS` requests are never gated.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, error, warn};

use super::validator::{KeyValidator, ValidationOutcome};
use crate::cache::TokenCache;
use crate::config::AuthConfig;

/// Message for requests without an `Authorization` header
pub const MISSING_HEADER_MESSAGE: &str = "Missing authorization header";
/// Message for an `Authorization` header that is not `Bearer <token>`
pub const INVALID_FORMAT_MESSAGE: &str = "Invalid authorization format. Use: Bearer <token>";
/// Message for keys the validator did not accept
pub const INVALID_KEY_MESSAGE: &str = "Invalid or expired API key";

/// Extract the token from a `Bearer <token>` header value.
///
/// The scheme is matched case-sensitively and the token must not be blank.
/// The token is returned verbatim.
#[must_use]
pub fn parse_bearer(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .filter(|token| !token.trim().is_empty())
}

/// Where an admitted key was confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// A cached validation was still fresh
    Cache,
    /// The validator was asked just now
    Validator,
}

/// Inserted into request extensions for downstream handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedKey {
    /// How the key was confirmed
    pub source: KeySource,
}

/// Why a request was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// No `Authorization` header
    MissingHeader,
    /// Header present but not `Bearer <token>`
    InvalidFormat,
    /// The validator rejected the key, or could not be asked
    InvalidKey,
}

impl AuthRejection {
    /// Client-facing message
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::MissingHeader => MISSING_HEADER_MESSAGE,
            Self::InvalidFormat => INVALID_FORMAT_MESSAGE,
            Self::InvalidKey => INVALID_KEY_MESSAGE,
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let mut response = error_response(StatusCode::UNAUTHORIZED, self.message());
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, header::HeaderValue::from_static("Bearer"));
        response
    }
}

/// Build the `{error, message, statusCode}` envelope used for every
/// response keygate generates itself
pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": status.canonical_reason().unwrap_or("Error"),
            "message": message,
            "statusCode": status.as_u16(),
        })),
    )
        .into_response()
}

/// Bearer key gate: cache in front of an external validator
pub struct KeyGate {
    enabled: bool,
    protected_prefix: String,
    ttl: Duration,
    timeout: Duration,
    cache: Arc<TokenCache>,
    validator: Arc<dyn KeyValidator>,
}

impl KeyGate {
    /// Create a gate with default settings (`/api/v1/`, 60s TTL, 5s timeout)
    pub fn new(validator: Arc<dyn KeyValidator>, cache: Arc<TokenCache>) -> Self {
        Self::from_config(&AuthConfig::default(), validator, cache)
    }

    /// Create a gate from `AuthConfig`
    pub fn from_config(
        config: &AuthConfig,
        validator: Arc<dyn KeyValidator>,
        cache: Arc<TokenCache>,
    ) -> Self {
        Self {
            enabled: config.enabled,
            protected_prefix: config.protected_prefix.clone(),
            ttl: config.cache_ttl,
            timeout: config.validation_timeout,
            cache,
            validator,
        }
    }

    /// Override the validator timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the gate enforces keys at all
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Token cache backing this gate
    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    /// Check if a path requires a key.
    ///
    /// The prefix itself without its trailing slash is protected too, so
    /// `/api/v1` is gated along with `/api/v1/...`.
    #[must_use]
    pub fn is_protected_path(&self, path: &str) -> bool {
        let bare = self.protected_prefix.trim_end_matches('/');
        path.starts_with(&self.protected_prefix) || (!bare.is_empty() && path == bare)
    }

    /// Decide whether the request headers carry an acceptable key
    pub async fn authorize(&self, headers: &HeaderMap) -> Result<AuthenticatedKey, AuthRejection> {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Err(AuthRejection::MissingHeader);
        };

        let token = value
            .to_str()
            .ok()
            .and_then(parse_bearer)
            .ok_or(AuthRejection::InvalidFormat)?;

        if self.cache.get(token).is_some() {
            return Ok(AuthenticatedKey {
                source: KeySource::Cache,
            });
        }

        let outcome = match tokio::time::timeout(self.timeout, self.validator.validate(token)).await
        {
            Ok(outcome) => outcome,
            Err(_) => ValidationOutcome::TransportError(format!(
                "validator did not answer within {:?}",
                self.timeout
            )),
        };

        match outcome {
            ValidationOutcome::Valid => {
                self.cache.set(token, self.ttl);
                debug!("API key validated and cached");
                Ok(AuthenticatedKey {
                    source: KeySource::Validator,
                })
            }
            ValidationOutcome::Invalid(reason) => {
                warn!(reason = %reason, "API key rejected by validator");
                Err(AuthRejection::InvalidKey)
            }
            ValidationOutcome::TransportError(reason) => {
                error!(reason = %reason, "API key validation failed, denying request");
                Err(AuthRejection::InvalidKey)
            }
        }
    }
}

/// Key gate middleware
pub async fn key_gate_middleware(
    State(gate): State<Arc<KeyGate>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let gated = gate.is_enabled()
        && request.method() != Method::OPTIONS
        && gate.is_protected_path(request.uri().path());
    if !gated {
        return next.run(request).await;
    }

    match gate.authorize(request.headers()).await {
        Ok(key) => {
            debug!(path = %request.uri().path(), source = ?key.source, "Authenticated request");
            request.extensions_mut().insert(key);
            next.run(request).await
        }
        Err(rejection) => {
            warn!(path = %request.uri().path(), reason = rejection.message(), "Unauthorized request");
            rejection.into_response()
        }
    }
}
