// HTTP request handlers
use crate::application::adaptive_data_service::DataQuery;
use crate::application::cache_key::parse_flag;
use crate::domain::query::{non_blank, DatasetKind, DepthFilter, SiteSelection};
use crate::domain::resolution::{AggregationMethod, Fidelity, PerformanceMode};
use crate::infrastructure::chunked_stream::{chunked_json_stream, frame_stream, DEFAULT_CHUNK_SIZE};
use crate::infrastructure::http_response::{accepts_brotli, json_response};
use crate::infrastructure::json_mapper::{response_to_json, OutputFormat, Page};
use crate::presentation::app_state::AppState;
use crate::presentation::error::AppError;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;

/// Query string of the data and stream routes. Everything arrives as text and
/// is validated in `into_request` so bad values get a JSON error body.
#[derive(Debug, Default, Deserialize)]
pub struct DataParams {
    pub sites: Option<String>,
    pub time_range: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub performance_mode: Option<String>,
    pub fidelity: Option<String>,
    pub parameters: Option<String>,
    pub resolution: Option<String>,
    pub downsample: Option<String>,
    pub max_points: Option<String>,
    pub depth_min: Option<String>,
    pub depth_max: Option<String>,
    pub format: Option<String>,
    pub chunk_size: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug)]
pub struct DataRequest {
    pub query: DataQuery,
    pub page: Page,
    pub format: OutputFormat,
}

impl DataParams {
    pub fn into_request(self, kind: DatasetKind) -> Result<DataRequest, AppError> {
        let start_date = non_blank(self.start_date.as_deref()).map(str::to_string);
        let end_date = non_blank(self.end_date.as_deref()).map(str::to_string);

        let time_range = match non_blank(self.time_range.as_deref()) {
            Some(range) => range.to_string(),
            None if start_date.is_some() => "custom".to_string(),
            None => "7d".to_string(),
        };

        let resolution = non_blank(self.resolution.as_deref())
            .map(|r| {
                AggregationMethod::parse(r)
                    .ok_or_else(|| AppError::BadRequest(format!("unknown resolution '{}'", r)))
            })
            .transpose()?;

        let downsample = match non_blank(self.downsample.as_deref()) {
            Some(flag) => parse_flag(flag)
                .ok_or_else(|| AppError::BadRequest(format!("downsample must be true or false, got '{}'", flag)))?,
            None => true,
        };

        let mut query = DataQuery::new(
            kind,
            SiteSelection::parse_csv(self.sites.as_deref().unwrap_or_default()),
            time_range,
        );
        query.start_date = start_date;
        query.end_date = end_date;
        query.performance_mode = PerformanceMode::parse(self.performance_mode.as_deref().unwrap_or_default());
        query.fidelity = Fidelity::parse(self.fidelity.as_deref().unwrap_or_default());
        query.parameters = self
            .parameters
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        query.resolution = resolution;
        query.downsample = downsample;
        query.max_points = parse_number(self.max_points.as_deref(), "max_points")?;
        query.depth = DepthFilter {
            min: parse_number(self.depth_min.as_deref(), "depth_min")?,
            max: parse_number(self.depth_max.as_deref(), "depth_max")?,
        };

        let page = Page {
            offset: parse_number(self.offset.as_deref(), "offset")?.unwrap_or(0),
            chunk_size: parse_number::<usize>(self.chunk_size.as_deref(), "chunk_size")?.filter(|&n| n > 0),
        };

        Ok(DataRequest {
            query,
            page,
            format: OutputFormat::parse(self.format.as_deref().unwrap_or_default()),
        })
    }
}

fn parse_number<T: FromStr>(value: Option<&str>, name: &str) -> Result<Option<T>, AppError> {
    non_blank(value)
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| AppError::BadRequest(format!("{} must be a number, got '{}'", name, v)))
        })
        .transpose()
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub pattern: String,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn water_quality_data(
    headers: HeaderMap,
    Query(params): Query<DataParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    serve_data(DatasetKind::WaterQuality, &headers, params, &state).await
}

pub async fn redox_data(
    headers: HeaderMap,
    Query(params): Query<DataParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    serve_data(DatasetKind::Redox, &headers, params, &state).await
}

pub async fn water_quality_stream(
    headers: HeaderMap,
    Query(params): Query<DataParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    stream_data(DatasetKind::WaterQuality, &headers, params, &state).await
}

pub async fn redox_stream(
    headers: HeaderMap,
    Query(params): Query<DataParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    stream_data(DatasetKind::Redox, &headers, params, &state).await
}

async fn serve_data(kind: DatasetKind, headers: &HeaderMap, params: DataParams, state: &AppState) -> Response {
    let request = match params.into_request(kind) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    let response = match state.data_service.fetch(&request.query).await {
        Ok(response) => response,
        Err(e) => return AppError::from(e).into_response(),
    };

    let body = response_to_json(&response, request.page, request.format);
    let cache_hit = response.cache_origin.is_some();

    match json_response(StatusCode::OK, &body, accepts_brotli(headers), Some(cache_hit)).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

/// Same pipeline as `serve_data`, emitted as length-prefixed frames
async fn stream_data(kind: DatasetKind, headers: &HeaderMap, params: DataParams, state: &AppState) -> Response {
    let request = match params.into_request(kind) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    let response = match state.data_service.fetch(&request.query).await {
        Ok(response) => response,
        Err(e) => return AppError::from(e).into_response(),
    };

    let chunk_size = request
        .page
        .chunk_size
        .or(state.default_chunk_size)
        .unwrap_or(DEFAULT_CHUNK_SIZE);
    let cache_hit = response.cache_origin.is_some();
    let frames = frame_stream(response, request.page.offset, chunk_size, request.format);

    match chunked_json_stream(frames, accepts_brotli(headers), cache_hit) {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

pub async fn invalidate_cache(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let pattern = request.pattern.trim();
    if pattern.is_empty() {
        return Err(AppError::BadRequest("pattern must not be empty".to_string()));
    }

    let deleted = state.data_service.cache().invalidate(pattern).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

pub async fn cache_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.data_service.cache().stats().await)
}
