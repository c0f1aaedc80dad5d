//! keygate
//!
//! Edge gateway that puts an API behind bearer key validation.
//!
//! # Features
//!
//! - **Key gate**: requests under `/api/v1/` need `Authorization: Bearer <token>`,
//!   checked against an external `validate-key` service
//! - **Token cache**: successful validations are trusted for 60 seconds
//! - **CORS**: origin allow-list applied to every `/api` response, preflights
//!   answered at the edge
//! - **Forwarding**: everything else is passed to the upstream application

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
