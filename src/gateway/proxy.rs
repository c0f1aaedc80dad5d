//! Forwarding to the upstream application
//!
//! Requests that get past the edge layers are replayed against the upstream
//! base URL with the same method, path, query, headers and body. Hop-by-hop
//! headers are dropped in both directions.

use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, Request, StatusCode, Uri, header},
    response::Response,
};
use tracing::{debug, warn};

use super::auth::error_response;
use crate::config::{ServerConfig, UpstreamConfig};
use crate::Result;

/// Headers that describe a single connection and must not be forwarded
static HOP_BY_HOP: [HeaderName; 10] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
    header::CONTENT_LENGTH,
];

static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

#[derive(Debug, thiserror::Error)]
enum ForwardError {
    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Client for the upstream application
#[derive(Debug, Clone)]
pub struct Upstream {
    base_url: String,
    http: reqwest::Client,
    max_body_size: usize,
}

impl Upstream {
    /// Create an upstream client for `base_url`
    pub fn new(base_url: &str, timeout: Duration, max_body_size: usize) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            max_body_size,
        })
    }

    /// Build the upstream client from config, if an upstream is configured
    pub fn from_config(upstream: &UpstreamConfig, server: &ServerConfig) -> Result<Option<Self>> {
        upstream
            .url
            .as_deref()
            .map(|url| Self::new(url, upstream.timeout, server.max_body_size))
            .transpose()
    }

    /// Base URL requests are forwarded to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upstream URL for an incoming request URI
    #[must_use]
    pub fn target_url(&self, uri: &Uri) -> String {
        let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
        format!("{}{}", self.base_url, path_and_query)
    }

    /// Forward `request` and turn the upstream answer into a response
    pub async fn forward(&self, request: Request<Body>) -> Response {
        match self.send(request).await {
            Ok(response) => response,
            Err(e @ ForwardError::BodyTooLarge(_)) => {
                debug!(error = %e, "Rejecting request body");
                error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
            }
            Err(ForwardError::Http(e)) => {
                warn!(upstream = %self.base_url, error = %e, "Upstream request failed");
                error_response(StatusCode::BAD_GATEWAY, "Upstream request failed")
            }
        }
    }

    async fn send(&self, request: Request<Body>) -> std::result::Result<Response, ForwardError> {
        let (parts, body) = request.into_parts();
        let url = self.target_url(&parts.uri);

        let body = axum::body::to_bytes(body, self.max_body_size)
            .await
            .map_err(|_| ForwardError::BodyTooLarge(self.max_body_size))?;

        let mut headers = strip_hop_by_hop(&parts.headers);
        if let Some(host) = parts.headers.get(header::HOST) {
            headers.insert(X_FORWARDED_HOST.clone(), host.clone());
        }

        debug!(method = %parts.method, url = %url, "Forwarding request upstream");
        let upstream = self
            .http
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let headers = strip_hop_by_hop(upstream.headers());
        let bytes = upstream.bytes().await?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in &HOP_BY_HOP {
        out.remove(name);
    }
    out
}

/// Response for requests nothing downstream can serve
pub(crate) fn no_route(uri: &Uri) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        &format!("No route for {}", uri.path()),
    )
}
