//! API server using Axum
//!
//! Hosts the control-plane endpoints and the WebSocket lease streams.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::broker::{
    ConnectionRegistry, LeaseScheduler, PayloadCodec, PoolManager, RefillCoordinator, SessionDeps,
};
use crate::cache::{LeaseCache, ProxyCache};
use crate::config::Config;
use crate::database::Database;
use crate::error::Result;
use crate::repository::LeaseStore;

use super::middleware::cors_layer;
use super::routes;

/// Shared state for API handlers and streaming sessions
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub cache: Option<Arc<ProxyCache>>,
    pub store: Arc<dyn LeaseStore>,
    pub pools: Arc<PoolManager>,
    pub registry: Arc<ConnectionRegistry>,
    pub scheduler: LeaseScheduler,
    pub refill: Arc<RefillCoordinator>,
    pub codec: Arc<PayloadCodec>,
}

impl AppState {
    /// The narrowed dependency set handed to streaming sessions
    pub fn session_deps(&self) -> SessionDeps {
        SessionDeps {
            pools: self.pools.clone(),
            registry: self.registry.clone(),
            scheduler: self.scheduler.clone(),
            refill: self.refill.clone(),
            store: self.store.clone(),
            cache: self
                .cache
                .clone()
                .map(|cache| cache as Arc<dyn LeaseCache>),
            codec: self.codec.clone(),
            secret: self.config.auth.secret.clone(),
            inbound_poll: Duration::from_millis(self.config.broker.inbound_poll_ms),
            idle_wait: Duration::from_secs(self.config.broker.idle_wait_secs),
        }
    }
}

/// API server
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router
    fn build_router(&self) -> Router {
        let cors = cors_layer(&self.state.config.server.cors_origins);

        routes::create_router(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = self
            .state
            .config
            .server_addr()
            .parse()
            .map_err(|_| crate::error::LessorError::InvalidConfig("invalid server address".into()))?;

        let router = self.build_router();

        info!("Broker listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| crate::error::LessorError::Internal(e.to_string()))?;

        info!("Broker shut down");
        Ok(())
    }
}
