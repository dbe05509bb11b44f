mod api;
mod cache_manager;
mod config;
mod decode;
mod discovery;

use std::sync::Arc;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use crate::cache_manager::CacheHandle;
use crate::config::Config;
use crate::decode::Decoder;
use crate::discovery::collector::UdpCollector;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("serverlistd=info"))
        )
        .init();

    tracing::info!("Starting serverlistd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/serverlistd/serverlistd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);
    tracing::info!(
        "Probing {} from {} for {} ms, caching results for {} ms",
        config.discovery.broadcast,
        config.discovery.listen,
        config.discovery.max_receiving_time_ms,
        config.cache.ttl_ms
    );

    let decoder = Decoder::new(&config.decoder);
    let collector = UdpCollector::new(config.discovery.clone(), decoder)?;

    // Start the single-flight cache task
    let cache_handle = CacheHandle::spawn(Arc::new(collector), config.cache.clone());

    let app = api::routes::router(api::routes::AppState {
        cache: cache_handle.clone(),
    });

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
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

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();
    let _ = server_handle.await;

    if let Err(e) = cache_handle.shutdown().await {
        tracing::error!("Failed to shutdown cache: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
