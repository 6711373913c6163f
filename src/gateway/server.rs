//! Gateway listeners
//!
//! The plain and the secure port serve the same router. TLS for the secure
//! port is terminated in front of the process.

use super::routes::router;
use super::state::GatewayState;
use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Gateway listener configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub http_port: u16,
    pub secure_port: Option<u16>,
}

/// Serves ticket and session sockets and the admin API
pub struct GatewayServer {
    config: GatewayConfig,
    state: GatewayState,
    shutdown_tx: broadcast::Sender<()>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, state: GatewayState) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            state,
            shutdown_tx,
        }
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    fn addresses(&self) -> Result<Vec<SocketAddr>> {
        let mut ports = vec![self.config.http_port];
        ports.extend(self.config.secure_port);

        ports
            .into_iter()
            .map(|port| {
                format!("{}:{}", self.config.host, port)
                    .parse()
                    .context("Invalid gateway address")
            })
            .collect()
    }

    /// Bind every listener and serve until stopped
    pub async fn start(&self) -> Result<()> {
        let mut listeners = JoinSet::new();
        for addr in self.addresses()? {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind gateway listener on {}", addr))?;
            info!("Gateway listening on http://{}", addr);

            let app = self.router();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            listeners.spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.recv().await;
                    })
                    .await
                    .with_context(|| format!("Gateway listener on {} failed", addr))
            });
        }

        while let Some(joined) = listeners.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("{:#}", e),
                Err(e) => error!("Gateway listener task panicked: {}", e),
            }
        }

        info!("Gateway stopped");
        Ok(())
    }

    /// Stop accepting connections on every listener
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping gateway...");
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to gateway: {}", e);
        }
        Ok(())
    }
}
