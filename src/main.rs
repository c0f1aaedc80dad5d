//! keygate - bearer key gate and CORS edge for an API

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use keygate::{
    cli::{Cli, Command},
    config::Config,
    gateway::{Gateway, check_key},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Validate { ref token }) => run_validate(&config, token).await,
        Some(Command::Serve) | None => run_server(cli, config).await,
    }
}

/// Check one key against the configured validator
async fn run_validate(config: &Config, token: &str) -> ExitCode {
    let outcome = match check_key(&config.auth, token).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("{outcome}");
    if outcome.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Run the gateway server
async fn run_server(cli: Cli, mut config: Config) -> ExitCode {
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(upstream) = cli.upstream {
        config.upstream.url = Some(upstream);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        auth = config.auth.enabled,
        "Starting keygate"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
