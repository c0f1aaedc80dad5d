//! Configuration management

use std::{env, path::Path, sync::LazyLock, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Pattern: `${VAR}` or `${VAR:-default}`
static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("env var pattern is valid")
});

/// Longest time a validated key may be trusted without asking again
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    /// Variables are set into the process environment for `${VAR}` resolution.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// API key authentication
    pub auth: AuthConfig,
    /// CORS policy for API routes
    pub cors: CorsConfig,
    /// Upstream application that receives forwarded traffic
    pub upstream: UpstreamConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum request body size forwarded upstream (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39500,
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// API key authentication for the protected route prefix
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable the key gate (default: true)
    pub enabled: bool,
    /// External `validate-key` endpoint. Required when auth is enabled.
    pub validator_url: Option<String>,
    /// Path prefix that requires a valid key
    pub protected_prefix: String,
    /// How long a successful validation is trusted
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// Upper bound on a single validator call
    #[serde(with = "humantime_serde")]
    pub validation_timeout: Duration,
    /// Interval of the background sweep of expired cache entries
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Cache size at which inserts sweep expired entries first
    pub max_entries: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            validator_url: None,
            protected_prefix: "/api/v1/".to_string(),
            cache_ttl: Duration::from_secs(60),
            validation_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(60),
            max_entries: 10_000,
        }
    }
}

/// CORS policy applied to every response under `path_prefix`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Path prefix that receives CORS headers
    pub path_prefix: String,
    /// Origins echoed back in `Access-Control-Allow-Origin`
    pub allowed_origins: Vec<String>,
    /// Value of `Access-Control-Allow-Headers`
    pub allowed_headers: Vec<String>,
    /// Value of `Access-Control-Max-Age`
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            path_prefix: "/api".to_string(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:3001".to_string(),
            ],
            allowed_headers: vec![
                "Authorization".to_string(),
                "Content-Type".to_string(),
                "X-Requested-With".to_string(),
                "Accept".to_string(),
            ],
            max_age: Duration::from_secs(86_400),
        }
    }
}

/// Upstream application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL requests are forwarded to (none = respond 404)
    pub url: Option<String>,
    /// Upstream request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (KEYGATE_ prefix)
        figment = figment.merge(Env::prefixed("KEYGATE_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files must land in the process environment before ${VAR} expansion
        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Check the loaded values before the gateway starts
    pub fn validate(&self) -> Result<()> {
        if self.auth.enabled {
            let Some(url) = self.auth.validator_url.as_deref() else {
                return Err(Error::Config(
                    "auth.validator_url is required when auth is enabled".to_string(),
                ));
            };
            check_http_url("auth.validator_url", url)?;
        }

        if self.auth.cache_ttl.is_zero() {
            return Err(Error::Config("auth.cache_ttl must be non-zero".to_string()));
        }
        if self.auth.cache_ttl > MAX_CACHE_TTL {
            return Err(Error::Config(format!(
                "auth.cache_ttl must be at most {}s",
                MAX_CACHE_TTL.as_secs()
            )));
        }
        if self.auth.validation_timeout.is_zero() {
            return Err(Error::Config(
                "auth.validation_timeout must be non-zero".to_string(),
            ));
        }
        if self.auth.sweep_interval.is_zero() {
            return Err(Error::Config(
                "auth.sweep_interval must be non-zero".to_string(),
            ));
        }
        if !self.auth.protected_prefix.starts_with('/') {
            return Err(Error::Config(format!(
                "auth.protected_prefix must start with '/': {}",
                self.auth.protected_prefix
            )));
        }

        if let Some(url) = self.upstream.url.as_deref() {
            check_http_url("upstream.url", url)?;
        }

        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand `${VAR}` and `${VAR:-default}` in the configured URLs
    fn expand_env_vars(&mut self) {
        if let Some(url) = self.auth.validator_url.as_mut() {
            *url = Self::expand_string(url);
        }
        if let Some(url) = self.upstream.url.as_mut() {
            *url = Self::expand_string(url);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(value: &str) -> String {
        ENV_VAR_PATTERN
            .replace_all(value, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map_or("", |m| m.as_str());
                env::var(var_name).unwrap_or_else(|_| default.to_string())
            })
            .into_owned()
    }
}

fn check_http_url(field: &str, value: &str) -> Result<()> {
    let parsed =
        Url::parse(value).map_err(|e| Error::Config(format!("{field} is not a valid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::Config(format!(
            "{field} must use http or https, got '{other}'"
        ))),
    }
}
