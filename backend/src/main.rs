//! Gateway Keeper - Main Entry Point

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};

use gateway_keeper_backend::{
    api::{self, AppState},
    config::Config,
    error::Result,
    services::{
        catalog,
        gateway_registry::GatewayRegistry,
        health_prober,
        persistence::StatePersistence,
        repair_service::LoggingRecordStore,
        transport::HttpTransport,
    },
    storage::{filesystem::FilesystemStore, memory::MemoryStore, KvStore},
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    telemetry::init_tracing();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Starting Gateway Keeper");

    // Snapshot store
    let store: Arc<dyn KvStore> = match &config.state_path {
        Some(path) => {
            tracing::info!(path = %path, "Persisting state to filesystem");
            Arc::new(FilesystemStore::new(path))
        }
        None => {
            tracing::info!("No STATE_PATH set, state will not survive restarts");
            Arc::new(MemoryStore::default())
        }
    };
    let persistence = Arc::new(StatePersistence::new(store));

    // Gateway registry: built-in catalog, then whatever survived the last run
    let registry = Arc::new(GatewayRegistry::with_builtin_catalog());
    let source = persistence.restore_registry(&registry).await;
    tracing::info!(?source, gateways = registry.len(), "Gateway registry ready");

    let transport = Arc::new(HttpTransport::new());

    if let Some(url) = &config.catalog_url {
        match catalog::fetch_remote_catalog(&reqwest::Client::new(), url).await {
            Ok(seeds) => {
                let mut added = 0;
                for seed in seeds {
                    match registry.register(seed) {
                        Ok(true) => added += 1,
                        Ok(false) => {}
                        Err(e) => tracing::warn!(error = %e, "Skipping catalog entry"),
                    }
                }
                tracing::info!(added, "Merged remote gateway catalog");
            }
            Err(e) => tracing::warn!(error = %e, "Failed to fetch remote gateway catalog"),
        }
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        transport,
        registry.clone(),
        Some(persistence.clone()),
        Arc::new(LoggingRecordStore),
    ));

    state.repair.restore().await;

    let probe_loop = health_prober::spawn_probe_loop(
        state.prober.clone(),
        registry,
        Some(persistence),
        config.probe_interval,
        state.shutdown.child_token(),
    );

    if config.repair_enabled {
        state.repair.start();
    }

    let app = api::routes::create_router(state.clone()).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // Start server
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                }
                _ = shutdown.cancelled() => {}
            }
        })
        .await?;

    state.shutdown.cancel();
    state.repair.stop().await;
    if let Err(e) = probe_loop.await {
        tracing::warn!(error = %e, "Probe loop exited abnormally");
    }
    state.repair.persist().await;
    tracing::info!("Gateway Keeper stopped");

    Ok(())
}
