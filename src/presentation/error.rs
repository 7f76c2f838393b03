// API errors - typed failures mapped to status codes and safe JSON bodies
use crate::application::adaptive_data_service::FetchError;
use crate::application::cache_store::CacheError;
use crate::application::data_repository::LoadError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("{0}")]
    BadRequest(String),
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Window(e) => AppError::BadRequest(e.to_string()),
            FetchError::Load(e) => AppError::Load(e),
        }
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Load(LoadError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Load(LoadError::Connection(_) | LoadError::Validation(_) | LoadError::Decode(_)) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Cache(CacheError::Pattern(_)) => StatusCode::BAD_REQUEST,
            AppError::Cache(CacheError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Load(LoadError::Connection(_)) => "connection",
            AppError::Load(LoadError::Validation(_)) => "validation",
            AppError::Load(LoadError::Timeout(_)) => "timeout",
            AppError::Load(LoadError::Decode(_)) => "decode",
            AppError::Cache(_) => "cache",
            AppError::BadRequest(_) => "bad_request",
        }
    }

    /// Upstream details stay in the logs; clients get a fixed message
    fn public_message(&self) -> String {
        match self {
            AppError::Load(LoadError::Connection(_)) => "The data warehouse is unavailable".to_string(),
            AppError::Load(LoadError::Validation(_)) => "The data warehouse rejected the query".to_string(),
            AppError::Load(LoadError::Timeout(_)) => "The data warehouse did not answer in time".to_string(),
            AppError::Load(LoadError::Decode(_)) => "The data warehouse returned an unreadable result".to_string(),
            AppError::Cache(CacheError::Unavailable(_)) => "The cache is unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "Request failed: {}", self);
        } else {
            tracing::warn!(kind = self.kind(), "Request rejected: {}", self);
        }

        let body = json!({
            "error": {
                "kind": self.kind(),
                "message": self.public_message(),
            }
        });
        (status, Json(body)).into_response()
    }
}
