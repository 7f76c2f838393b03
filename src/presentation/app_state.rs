// Application state for HTTP handlers
use crate::application::adaptive_data_service::AdaptiveDataService;

#[derive(Clone)]
pub struct AppState {
    pub data_service: AdaptiveDataService,
    /// Rows per frame on stream routes when the request gives no chunk_size
    pub default_chunk_size: Option<usize>,
}
