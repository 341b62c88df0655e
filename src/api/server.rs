//! API server using Axum

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::Config;
use crate::error::{HarvestError, Result};
use crate::pool::PoolStore;

use super::middleware::cors_layer;
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<PoolStore>,
    pub config: Config,
    pub started_at: Instant,
}

/// API server
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(config: Config, pool: Arc<PoolStore>) -> Self {
        Self {
            state: AppState {
                pool,
                config,
                started_at: Instant::now(),
            },
        }
    }

    /// Build the router with tracing and CORS layers
    pub fn build_router(&self) -> Router {
        let cors = cors_layer(&self.state.config.api.cors_origins);

        routes::create_router(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` flips
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = self.state.config.api_addr().parse().map_err(|e| {
            HarvestError::InvalidConfig(format!(
                "invalid API address {}: {}",
                self.state.config.api_addr(),
                e
            ))
        })?;

        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("API server listening on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| HarvestError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
