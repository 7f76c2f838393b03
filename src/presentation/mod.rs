// Presentation layer - HTTP routes over the application services
pub mod app_state;
pub mod error;
pub mod handlers;

use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    cache_stats, health_check, invalidate_cache, redox_data, redox_stream, water_quality_data,
    water_quality_stream,
};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

// Compression is done in the response builders, so no CompressionLayer here
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/api/water-quality/data", get(water_quality_data))
        .route("/api/redox/data", get(redox_data))
        .route("/api/water-quality/stream", get(water_quality_stream))
        .route("/api/redox/stream", get(redox_stream))
        .route("/api/cache/invalidate", post(invalidate_cache))
        .route("/api/cache/stats", get(cache_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
