//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// keygate - bearer key gate and CORS edge for an API
#[derive(Parser, Debug)]
#[command(name = "keygate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "KEYGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "KEYGATE_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "KEYGATE_HOST")]
    pub host: Option<String>,

    /// Upstream application URL (overrides `upstream.url`)
    #[arg(long, env = "KEYGATE_UPSTREAM_URL")]
    pub upstream: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "KEYGATE_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "KEYGATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Ask the configured validator about a single key
    Validate {
        /// Bearer token to check (without the `Bearer ` prefix)
        #[arg(required = true)]
        token: String,
    },
}
