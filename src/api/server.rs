use std::net::SocketAddr;

use axum::Router;
use tokio::signal;
use tracing::{debug, error, info};

use crate::api::routes;
use crate::api::types::ApiState;
use crate::error::Error;
use crate::types::Result;

/// API server runtime
pub struct ApiServer {
    /// Listening address
    address: SocketAddr,
    /// Router
    router: Router,
}

impl ApiServer {
    /// Create a new API server from the shared state
    pub fn new(state: ApiState) -> Result<Self> {
        let address = state
            .settings
            .api_address()
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("Invalid API address: {}", e)))?;

        Ok(Self {
            address,
            router: routes::create_router(state),
        })
    }

    /// Serve until CTRL+C or SIGTERM
    pub async fn start_with_shutdown(self) -> Result<()> {
        info!("Starting API server on {}", self.address);

        let server = axum::Server::try_bind(&self.address)
            .map_err(|e| Error::Config(format!("Cannot bind {}: {}", self.address, e)))?
            .serve(self.router.into_make_service())
            .with_graceful_shutdown(shutdown_signal());

        if let Err(e) = server.await {
            error!("API server error: {}", e);
            return Err(Error::Internal(format!("API server error: {}", e)));
        }

        info!("API server shut down gracefully");
        Ok(())
    }

    pub fn address(&self) -> &SocketAddr {
        &self.address
    }
}

/// Wait for CTRL+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => debug!("Received Ctrl+C signal"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                debug!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
