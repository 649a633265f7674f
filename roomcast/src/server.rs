use std::sync::Arc;
use tracing::{error, info};

use roomcast_api::{create_router, AppState};
use roomcast_cluster::Broker;
use roomcast_core::Config;

/// Roomcast server - HTTP listener plus the backplane it serves
pub struct RoomcastServer {
    config: Config,
    broker: Arc<Broker>,
    state: AppState,
}

impl RoomcastServer {
    pub const fn new(config: Config, broker: Arc<Broker>, state: AppState) -> Self {
        Self {
            config,
            broker,
            state,
        }
    }

    /// Serve HTTP until a shutdown signal, then shut the backplane down
    pub async fn start(self) -> anyhow::Result<()> {
        let http_addr = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;

        info!("HTTP server listening on {}", http_addr);

        let router = create_router(self.state);

        // Event streams never finish on their own; closing every queue
        // lets them end so the graceful shutdown can complete
        let broker = self.broker.clone();
        let graceful = async move {
            shutdown_signal().await;
            info!("Shutdown signal received, starting graceful shutdown...");
            broker.shutdown();
        };

        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(graceful)
            .await
        {
            error!("HTTP server error: {}", e);
        }

        info!("Roomcast server shut down gracefully");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
