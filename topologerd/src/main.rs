mod api;
mod config;
mod error;
mod geo;
mod ingest;
mod net;
mod service;
mod store;
mod store_manager;
mod target;
mod trace;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::service::TracerouteService;
use crate::store::db::TopologyDb;
use crate::store_manager::StoreHandle;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("topologerd=info"))
        )
        .init();

    tracing::info!("Starting topologerd");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/topologer/topologerd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let db = TopologyDb::open(&config.store.db_path)?;
    tracing::info!("Opened database at {:?}", config.store.db_path);

    let initial_hash = store::hash::compute_hash(&db.map_projection()?);
    tracing::info!("Initial topology hash: {}", initial_hash);

    let (hash_tx, hash_rx) = watch::channel(initial_hash);
    let store_handle = StoreHandle::spawn(db, hash_tx);

    let system = store_handle
        .ensure_system(config.system.clone())
        .await
        .context("Failed to register measurement system")?;
    tracing::info!("Measuring as {} ({})", system.name, system.address);

    let geo = geo::from_config(&config.geo);
    let service = TracerouteService::new(
        store_handle.clone(),
        geo,
        config.system.clone(),
        config.trace.clone(),
    );

    let app = api::routes::router(api::routes::AppState { service, hash_rx });

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");
    cancel.cancel();

    let _ = server_handle.await;

    if let Err(e) = store_handle.shutdown().await {
        tracing::error!("Failed to shutdown store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
