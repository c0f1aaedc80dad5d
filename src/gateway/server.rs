//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::auth::KeyGate;
use super::cors::CorsPolicy;
use super::proxy::Upstream;
use super::router::{AppState, create_router};
use super::validator::{HttpKeyValidator, KeyValidator, RejectAll};
use crate::cache::TokenCache;
use crate::config::Config;
use crate::{Error, Result};

/// keygate server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared state handed to the router
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a gateway that validates keys over HTTP
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let validator: Arc<dyn KeyValidator> = if config.auth.validator_url.is_some() {
            Arc::new(HttpKeyValidator::from_config(&config.auth)?)
        } else {
            Arc::new(RejectAll)
        };
        Self::with_validator(config, validator)
    }

    /// Create a gateway with a caller-supplied validator
    pub fn with_validator(config: Config, validator: Arc<dyn KeyValidator>) -> Result<Self> {
        let cache = Arc::new(TokenCache::with_max_entries(config.auth.max_entries));
        let gate = Arc::new(KeyGate::from_config(&config.auth, validator, cache));
        let cors = Arc::new(CorsPolicy::from_config(&config.cors)?);
        let upstream = Upstream::from_config(&config.upstream, &config.server)?.map(Arc::new);

        let state = Arc::new(AppState {
            gate,
            cors,
            upstream,
        });

        Ok(Self { config, state })
    }

    /// Router serving this gateway
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Token cache shared by all requests
    pub fn token_cache(&self) -> &Arc<TokenCache> {
        self.state.gate.cache()
    }

    /// Run the gateway until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("KEYGATE v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");

        if self.config.auth.enabled {
            info!(
                prefix = %self.config.auth.protected_prefix,
                validator = self.config.auth.validator_url.as_deref().unwrap_or_default(),
                ttl = ?self.config.auth.cache_ttl,
                "KEY GATE enabled"
            );
        } else {
            warn!("KEY GATE disabled - protected routes are open to all requests");
        }

        info!(
            prefix = %self.config.cors.path_prefix,
            origins = ?self.config.cors.allowed_origins,
            "CORS policy"
        );

        match self.state.upstream.as_deref() {
            Some(upstream) => info!(upstream = %upstream.base_url(), "Forwarding traffic upstream"),
            None => warn!("No upstream configured - unmatched routes answer 404"),
        }
        info!("============================================================");

        spawn_cache_sweeper(
            Arc::clone(self.state.gate.cache()),
            self.config.auth.sweep_interval,
            shutdown_tx.subscribe(),
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        Ok(())
    }
}

/// Periodically drop expired tokens so rotating keys cannot grow the cache
pub fn spawn_cache_sweeper(
    cache: Arc<TokenCache>,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = cache.sweep();
                    if removed > 0 {
                        debug!(removed, remaining = cache.len(), "Swept expired tokens");
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    })
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
