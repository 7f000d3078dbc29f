//! Lessor Proxy Lease Broker - Entry Point
//!
//! Starts the broker server and the lease return worker with graceful
//! shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod broker;
mod cache;
mod config;
mod database;
mod error;
mod models;
mod repository;

use api::{ApiServer, AppState};
use broker::{ConnectionRegistry, LeaseScheduler, PayloadCodec, PoolManager, RefillCoordinator};
use cache::{LeaseCache, ProxyCache};
use config::Config;
use database::Database;
use repository::{LeaseStore, PgStore, ProxyRepository};

#[tokio::main]
async fn main() -> error::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lessor=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Lessor Proxy Lease Broker");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");

    if config.auth.secret.is_empty() {
        warn!("No shared secret configured, streaming sessions will be rejected");
    }

    // Connect to database
    let db = Database::new(&config).await?;
    info!("Connected to database");

    // Run migrations
    db.run_migrations().await?;
    info!("Database migrations complete");

    // Connect to the warm cache; the broker starts without it
    let cache = match ProxyCache::connect(&config).await {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!(
                "Warm cache unavailable: {} (refill will fall through to the store)",
                e
            );
            None
        }
    };

    // Warm up the cache and the per-source pools from the store
    let pools = Arc::new(PoolManager::new());
    let proxy_repo = ProxyRepository::new(db.pool().clone());
    match proxy_repo.get_all().await {
        Ok(records) => {
            if let Some(cache) = &cache {
                if let Err(e) = cache.load_all(&records).await {
                    warn!("Failed to warm cache: {}", e);
                }
            }
            let count = pools.rebuild(records);
            info!(
                proxies = count,
                pools = pools.pool_count(),
                "Initialized proxy pools"
            );
        }
        Err(e) => warn!("Failed to load proxies for warm-up: {}", e),
    }

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    // Start the lease return worker
    let (scheduler, return_worker) = LeaseScheduler::new(pools.clone());
    let scheduler_shutdown = shutdown_tx.subscribe();
    let scheduler_task = tokio::spawn(return_worker.run(scheduler_shutdown));

    // Assemble the lease engine
    let store: Arc<dyn LeaseStore> = Arc::new(PgStore::new(db.pool().clone()));
    let refill = Arc::new(RefillCoordinator::new(
        pools.clone(),
        store.clone(),
        cache.clone().map(|cache| cache as Arc<dyn LeaseCache>),
        &config.broker,
    ));

    let codec = Arc::new(PayloadCodec::new(&config.auth.encryption_key));
    if !codec.is_enabled() {
        warn!("Payload encryption disabled: credentials will be sent in plaintext");
    }

    let state = AppState {
        db: db.clone(),
        config: config.clone(),
        cache,
        store,
        pools,
        registry: Arc::new(ConnectionRegistry::new()),
        scheduler,
        refill,
        codec,
    };

    // Start the broker server
    let api_server = ApiServer::new(state);
    let api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("Broker server error: {}", e);
        }
    });

    info!("Broker started on {}", config.server_addr());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    // Stop the server and the return worker; pending returns are dropped
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(api_task, scheduler_task);

    db.close().await;
    info!("Lessor stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
