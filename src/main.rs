//! Authentication gateway
//!
//! Serves a bearer-token protected API, or mints admin tokens for it.

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use authn_gateway::{
    auth::AdminTokenSigner,
    cli::{Cli, Command},
    config::Config,
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::IssueAdminToken { ttl }) => run_issue_admin_token(cli.config.as_deref(), ttl),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Print a signed admin token to stdout
fn run_issue_admin_token(config_path: Option<&Path>, ttl: Option<Duration>) -> ExitCode {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let Some(admin) = config.auth.admin.as_ref() else {
        eprintln!("Admin tokens are not enabled (auth.admin is not configured)");
        return ExitCode::FAILURE;
    };

    let issued = AdminTokenSigner::from_config(admin)
        .and_then(|signer| signer.issue(ttl.unwrap_or(admin.token_ttl)));
    match issued {
        Ok(token) => {
            println!("{token}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to issue admin token: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the server
async fn run_server(cli: Cli) -> ExitCode {
    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        admin = config.auth.admin.is_some(),
        oidc = config.auth.oidc.is_some(),
        proxied = config.auth.proxy.is_some(),
        "Starting authentication gateway"
    );

    let server = match Server::new(config).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to initialize authentication: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
