//! External API key validation
//!
//! The key gate asks a [`KeyValidator`] whether a bearer token is valid.
//! [`HttpKeyValidator`] calls the `validate-key` endpoint of the
//! authorization service and forwards the caller's `Authorization` header.

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::AuthConfig;
use crate::{Error, Result};

/// Result of asking the authorization service about a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The service accepted the token
    Valid,
    /// The service answered and rejected the token
    Invalid(String),
    /// The service could not be reached or gave an unusable answer
    TransportError(String),
}

impl ValidationOutcome {
    /// Whether the token may be admitted
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::Invalid(reason) => write!(f, "invalid: {reason}"),
            Self::TransportError(reason) => write!(f, "transport error: {reason}"),
        }
    }
}

/// Something that can decide whether a bearer token is valid.
///
/// Implementations must not panic; every failure is expressed as a
/// [`ValidationOutcome`]. Callers bound the call with their own timeout.
#[async_trait]
pub trait KeyValidator: Send + Sync {
    /// Validate `token`
    async fn validate(&self, token: &str) -> ValidationOutcome;
}

/// Admits nothing. Stands in when no authorization service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

#[async_trait]
impl KeyValidator for RejectAll {
    async fn validate(&self, _token: &str) -> ValidationOutcome {
        ValidationOutcome::Invalid("no validator configured".to_string())
    }
}

/// Body returned by the `validate-key` endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateKeyResponse {
    #[serde(default)]
    is_success: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Validates tokens against a remote `validate-key` endpoint
#[derive(Debug, Clone)]
pub struct HttpKeyValidator {
    url: String,
    http: reqwest::Client,
}

impl HttpKeyValidator {
    /// Create a validator for `url` with a default HTTP client
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(url, reqwest::Client::new())
    }

    /// Create a validator that reuses an existing HTTP client
    #[must_use]
    pub fn with_client(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            http,
        }
    }

    /// Create the validator described by `AuthConfig`.
    ///
    /// The HTTP client timeout matches `validation_timeout`.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let url = config.validator_url.clone().ok_or_else(|| {
            Error::Config("auth.validator_url is required to validate keys".to_string())
        })?;
        let http = reqwest::Client::builder()
            .timeout(config.validation_timeout)
            .build()?;
        Ok(Self::with_client(url, http))
    }

    /// Endpoint this validator calls
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeyValidator for HttpKeyValidator {
    async fn validate(&self, token: &str) -> ValidationOutcome {
        let response = match self
            .http
            .get(&self.url)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return ValidationOutcome::TransportError(e.to_string()),
        };

        let status = response.status();
        if !status.is_success() {
            return ValidationOutcome::Invalid(format!("validator responded {status}"));
        }

        match response.json::<ValidateKeyResponse>().await {
            Ok(body) if body.is_success => ValidationOutcome::Valid,
            Ok(body) => {
                let reason = body
                    .message
                    .unwrap_or_else(|| "validator reported isSuccess=false".to_string());
                debug!(reason = %reason, "Validator rejected key");
                ValidationOutcome::Invalid(reason)
            }
            Err(e) => ValidationOutcome::TransportError(format!("unreadable validator body: {e}")),
        }
    }
}

/// Ask the configured validator about a single token.
///
/// The call is bounded by `validation_timeout`; running out of time is a
/// transport error. Fails only when no validator can be built from `config`.
pub async fn check_key(config: &AuthConfig, token: &str) -> Result<ValidationOutcome> {
    let validator = HttpKeyValidator::from_config(config)?;
    let outcome = tokio::time::timeout(config.validation_timeout, validator.validate(token))
        .await
        .unwrap_or_else(|_| {
            ValidationOutcome::TransportError(format!(
                "validator did not answer within {:?}",
                config.validation_timeout
            ))
        });
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        assert_eq!(ValidationOutcome::Valid.to_string(), "valid");
        assert_eq!(
            ValidationOutcome::Invalid("revoked".to_string()).to_string(),
            "invalid: revoked"
        );
        assert_eq!(
            ValidationOutcome::TransportError("connection refused".to_string()).to_string(),
            "transport error: connection refused"
        );
    }

    #[test]
    fn test_only_valid_admits() {
        assert!(ValidationOutcome::Valid.is_valid());
        assert!(!ValidationOutcome::Invalid(String::new()).is_valid());
        assert!(!ValidationOutcome::TransportError(String::new()).is_valid());
    }

    #[tokio::test]
    async fn test_reject_all() {
        let outcome = RejectAll.validate("anything").await;
        assert!(matches!(outcome, ValidationOutcome::Invalid(_)));
    }

    #[test]
    fn test_from_config_requires_url() {
        let config = AuthConfig::default();
        assert!(HttpKeyValidator::from_config(&config).is_err());

        let config = AuthConfig {
            validator_url: Some("https://auth.example.com/api/validate-key".to_string()),
            ..AuthConfig::default()
        };
        let validator = HttpKeyValidator::from_config(&config).unwrap();
        assert_eq!(validator.url(), "https://auth.example.com/api/validate-key");
    }

    #[test]
    fn test_response_body_shape() {
        let body: ValidateKeyResponse =
            serde_json::from_str(r#"{"isSuccess": true, "data": {"keyId": 7}}"#).unwrap();
        assert!(body.is_success);

        let body: ValidateKeyResponse = serde_json::from_str("{}").unwrap();
        assert!(!body.is_success);
        assert!(body.message.is_none());
    }
}
