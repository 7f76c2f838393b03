// Warehouse repository - loads sensor rows from the HTTP statement executor
use crate::application::data_repository::{DataRepository, LoadError, LoadRequest};
use crate::domain::query::{parse_date, DatasetKind};
use crate::domain::timeseries::{Dataset, TimeSeriesRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const TIMESTAMP_COLUMN: &str = "timestamp";
const SITE_COLUMN: &str = "site_code";
const DEPTH_COLUMN: &str = "depth_cm";

/// Longest slice of an error body echoed back in a validation error
const MAX_ERROR_BODY: usize = 300;

#[derive(Debug, Clone)]
pub struct WarehouseRepository {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    dataset: &'a str,
    sites: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<String>,
    end: String,
    columns: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    depth_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    depth_max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<usize>,
}

/// Columnar result set returned by the executor
#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
    #[serde(default)]
    error: Option<String>,
}

impl WarehouseRepository {
    pub fn new(endpoint: String, token: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
            timeout,
        }
    }

    async fn execute(&self, body: &QueryBody<'_>) -> Result<QueryResult, LoadError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header("Accept", "application/json")
            .json(body);
        if !self.token.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.token));
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(LoadError::Validation(format!(
                "warehouse returned {}: {}",
                status,
                text.chars().take(MAX_ERROR_BODY).collect::<String>()
            )));
        }
        if !status.is_success() {
            return Err(LoadError::Connection(format!("warehouse returned {}", status)));
        }

        let result = response
            .json::<QueryResult>()
            .await
            .map_err(|e| self.transport_error(e))?;

        if let Some(error) = result.error {
            return Err(LoadError::Validation(error));
        }

        Ok(result)
    }

    fn transport_error(&self, err: reqwest::Error) -> LoadError {
        if err.is_timeout() {
            LoadError::Timeout(self.timeout)
        } else if err.is_decode() {
            LoadError::Decode(err.to_string())
        } else {
            LoadError::Connection(err.to_string())
        }
    }
}

#[async_trait]
impl DataRepository for WarehouseRepository {
    async fn load(&self, request: &LoadRequest) -> Result<Dataset, LoadError> {
        let depth = request.depth_filter.unwrap_or_default();
        let body = QueryBody {
            dataset: request.kind.endpoint(),
            sites: &request.site_codes,
            start: request.start.map(|s| s.to_rfc3339()),
            end: request.end.to_rfc3339(),
            columns: &request.value_columns,
            depth_min: depth.min,
            depth_max: depth.max,
            limit: request.limit,
            offset: request.offset,
        };

        tracing::debug!(
            dataset = body.dataset,
            sites = request.site_codes.len(),
            start = ?body.start,
            end = %body.end,
            "Executing warehouse query"
        );

        let result = self.execute(&body).await?;
        let dataset = decode_rows(request.kind, &result.columns, &result.rows, &request.value_columns)?;

        Ok(if request.dedupe { dataset.dedupe() } else { dataset })
    }
}

/// Turn a columnar result into a time-sorted dataset. Rows with an unreadable
/// timestamp are dropped; the count is logged.
fn decode_rows(
    kind: DatasetKind,
    columns: &[String],
    rows: &[Vec<Value>],
    requested: &[String],
) -> Result<Dataset, LoadError> {
    let position = |name: &str| columns.iter().position(|c| c.eq_ignore_ascii_case(name));

    let time_idx = position(TIMESTAMP_COLUMN)
        .ok_or_else(|| LoadError::Decode(format!("result has no '{}' column", TIMESTAMP_COLUMN)))?;
    let site_idx = position(SITE_COLUMN);
    let depth_idx = position(DEPTH_COLUMN);

    let value_columns: Vec<String> = if requested.is_empty() {
        columns
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != time_idx && Some(*i) != site_idx && Some(*i) != depth_idx)
            .map(|(_, c)| c.clone())
            .collect()
    } else {
        requested.to_vec()
    };
    let value_idx: Vec<Option<usize>> = value_columns.iter().map(|c| position(c)).collect();

    let mut skipped = 0usize;
    let mut decoded = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(timestamp) = row.get(time_idx).and_then(as_timestamp) else {
            skipped += 1;
            continue;
        };
        let site_code = site_idx
            .and_then(|i| row.get(i))
            .map(as_text)
            .unwrap_or_default();
        let depth_cm = depth_idx.and_then(|i| row.get(i)).and_then(as_number);
        let values = value_idx
            .iter()
            .map(|idx| idx.and_then(|i| row.get(i)).and_then(as_number))
            .collect();

        decoded.push(TimeSeriesRow::new(timestamp, site_code, depth_cm, values));
    }

    if skipped > 0 {
        tracing::warn!(dataset = kind.endpoint(), skipped, "Dropped rows with unreadable timestamps");
    }

    let mut dataset = Dataset::new(value_columns, decoded);
    dataset.sort_by_time();
    Ok(dataset)
}

fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_date(s, false).ok(),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
