//! Gateway server

mod router;

pub use router::{AppState, PublicOidcConfig, PublicServerConfig, WHOAMI_PATH, create_router};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::auth::Authenticator;
use crate::config::Config;
use crate::{Error, Result};

/// Authentication gateway server
pub struct Server {
    config: Config,
    authenticator: Arc<Authenticator>,
}

impl Server {
    /// Create a server, initializing every configured authentication scheme.
    ///
    /// OIDC discovery happens here, so a server that was created successfully
    /// can verify tokens from its first request.
    pub async fn new(config: Config) -> Result<Self> {
        let authenticator = Arc::new(Authenticator::from_config(&config.auth).await?);
        Ok(Self {
            config,
            authenticator,
        })
    }

    /// The router this server runs.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        create_router(Arc::new(AppState {
            authenticator: Arc::clone(&self.authenticator),
            public_config: PublicServerConfig::from_config(&self.config),
        }))
    }

    /// Serve until Ctrl+C or SIGTERM, then drain for at most
    /// `server.shutdown_timeout`.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, "Authentication gateway listening");

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let serve = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .into_future();
        let mut server = tokio::spawn(serve);

        tokio::select! {
            outcome = &mut server => return flatten(outcome),
            _ = shutdown_rx.recv() => {}
        }

        match tokio::time::timeout(self.config.server.shutdown_timeout, server).await {
            Ok(outcome) => flatten(outcome),
            Err(_) => {
                warn!(
                    timeout = ?self.config.server.shutdown_timeout,
                    "In-flight requests did not drain in time"
                );
                Ok(())
            }
        }
    }
}

fn flatten(
    outcome: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match outcome {
        Ok(result) => Ok(result?),
        Err(e) => Err(Error::Server(e.to_string())),
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
