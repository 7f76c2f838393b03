// Mapper to convert pipeline results to the JSON wire shape
use crate::application::adaptive_data_service::DataResponse;
use crate::domain::timeseries::Dataset;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Rows,
    Columnar,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "columnar" | "columns" => OutputFormat::Columnar,
            _ => OutputFormat::Rows,
        }
    }
}

/// Slice of the full result a client asked for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    /// `None` returns everything after `offset`
    pub chunk_size: Option<usize>,
}

impl Page {
    pub fn apply(&self, dataset: &Dataset) -> Dataset {
        let len = self.chunk_size.unwrap_or(dataset.len());
        dataset.slice(self.offset, len)
    }
}

/// `{ data | data_columnar, metadata }` for one page of a response
pub fn response_to_json(response: &DataResponse, page: Page, format: OutputFormat) -> Value {
    let sliced = page.apply(&response.dataset);
    let mut body = Map::new();
    let (field, data) = dataset_to_json(&sliced, format);
    body.insert(field.to_string(), data);
    body.insert("metadata".to_string(), metadata_to_json(response, page, sliced.len()));
    Value::Object(body)
}

pub fn metadata_to_json(response: &DataResponse, page: Page, returned: usize) -> Value {
    let meta = &response.metadata;
    json!({
        "resolution": {
            "aggregation_method": meta.aggregation_method,
            "performance_tier": meta.performance_tier,
            "target_points": meta.target_points,
            "time_range_days": meta.time_range_days,
        },
        "total_records": meta.total_records,
        "returned_records": returned,
        "loaded_records": meta.loaded_records,
        "cache": {
            "origin": response.cache_origin.map(|o| o.as_str()).unwrap_or("miss"),
            "key": response.cache_key,
        },
        "extrema_skipped": meta.extrema_skipped,
        "processing_ms": response.processing_ms,
        "phases": response.phases,
        "offset": page.offset,
        "chunk_size": page.chunk_size,
        "has_more": page.offset.saturating_add(returned) < meta.total_records,
        "notice": response.notice,
    })
}

/// Field name and payload for the requested format
pub fn dataset_to_json(dataset: &Dataset, format: OutputFormat) -> (&'static str, Value) {
    match format {
        OutputFormat::Rows => ("data", Value::Array(rows_to_json(dataset))),
        OutputFormat::Columnar => ("data_columnar", columnar_to_json(dataset)),
    }
}

fn rows_to_json(dataset: &Dataset) -> Vec<Value> {
    dataset
        .rows
        .iter()
        .map(|row| {
            let mut object = Map::new();
            object.insert("timestamp".to_string(), json!(row.timestamp.to_rfc3339()));
            object.insert("site_code".to_string(), json!(row.site_code));
            if let Some(depth) = row.depth_cm {
                object.insert("depth_cm".to_string(), json!(depth));
            }
            for (name, value) in dataset.value_columns.iter().zip(&row.values) {
                object.insert(name.clone(), number(*value));
            }
            Value::Object(object)
        })
        .collect()
}

fn columnar_to_json(dataset: &Dataset) -> Value {
    let mut columns = Map::new();
    columns.insert(
        "timestamp".to_string(),
        dataset.rows.iter().map(|r| json!(r.timestamp.to_rfc3339())).collect(),
    );
    columns.insert(
        "site_code".to_string(),
        dataset.rows.iter().map(|r| json!(r.site_code)).collect(),
    );
    if dataset.rows.iter().any(|r| r.depth_cm.is_some()) {
        columns.insert(
            "depth_cm".to_string(),
            dataset.rows.iter().map(|r| number(r.depth_cm)).collect(),
        );
    }
    for (i, name) in dataset.value_columns.iter().enumerate() {
        let values = dataset.column(i).into_iter().map(number).collect();
        columns.insert(name.clone(), values);
    }
    Value::Object(columns)
}

/// Missing and non-finite values become null
fn number(value: Option<f64>) -> Value {
    value
        .filter(|v| v.is_finite())
        .map(Value::from)
        .unwrap_or(Value::Null)
}
