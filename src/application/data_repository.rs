// Repository trait for sensor data access
use crate::domain::query::{DatasetKind, DepthFilter};
use crate::domain::timeseries::Dataset;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Filters for one load from the warehouse
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub kind: DatasetKind,
    pub site_codes: Vec<String>,
    /// `None` loads from the beginning of the record
    pub start: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
    /// Empty selects every value column the dataset has
    pub value_columns: Vec<String>,
    pub depth_filter: Option<DepthFilter>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Collapse rows sharing (site, depth, timestamp) into their mean
    pub dedupe: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not reach the data warehouse: {0}")]
    Connection(String),
    #[error("query rejected: {0}")]
    Validation(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("unreadable warehouse response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait DataRepository: Send + Sync {
    /// Rows matching the request, sorted by timestamp
    async fn load(&self, request: &LoadRequest) -> Result<Dataset, LoadError>;
}
