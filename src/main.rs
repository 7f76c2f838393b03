// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use anyhow::Context;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing_subscriber::EnvFilter;

use crate::application::adaptive_data_service::{AdaptiveDataService, PipelineSettings};
use crate::application::clock::SystemClock;
use crate::application::fidelity_cache::FidelityCache;
use crate::application::resolution_policy::ResolutionPolicy;
use crate::application::sampling::{peak_finder_for, Sampler};
use crate::infrastructure::config::load_service_config;
use crate::infrastructure::memory_cache::MemoryCacheStore;
use crate::infrastructure::warehouse_repository::WarehouseRepository;
use crate::presentation::app_state::AppState;
use crate::presentation::router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("envmon_dashboard=info,tower_http=info")),
        )
        .init();

    // Load configuration
    let config = load_service_config().context("loading service configuration")?;

    // Create repository and cache store (infrastructure layer)
    let repository = Arc::new(WarehouseRepository::new(
        config.warehouse.endpoint.clone(),
        config.warehouse.token.clone(),
        Duration::from_secs(config.warehouse.timeout_secs),
    ));
    let store = Arc::new(MemoryCacheStore::new(config.cache.max_entries));

    // Create services (application layer)
    let peak_finder = peak_finder_for(
        config.sampling.extrema_strategy,
        config.sampling.rolling_row_limit,
    );
    tracing::info!(strategy = peak_finder.name(), "Selected extrema strategy");

    let data_service = AdaptiveDataService::new(
        repository,
        FidelityCache::new(store, Duration::from_secs(config.cache.ttl_secs)),
        ResolutionPolicy::new(config.resolution.clone(), config.warehouse.max_rows),
        Sampler::new(peak_finder, config.sampling.min_non_null),
        Arc::new(SystemClock),
        PipelineSettings {
            min_rows: config.pipeline.min_rows,
            max_rows: config.warehouse.max_rows,
        },
    );

    // Create application state
    let state = Arc::new(AppState {
        data_service,
        default_chunk_size: config.pipeline.default_chunk_size,
    });

    // Build router (presentation layer)
    let router = router(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid server.bind '{}'", config.server.bind))?;
    tracing::info!(%addr, warehouse = %config.warehouse.endpoint, "Starting envmon-dashboard");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
