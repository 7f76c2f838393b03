// Aggregator - time-bucketed means per group
use crate::domain::resolution::ResolutionConfig;
use crate::domain::timeseries::{Dataset, GroupColumn, TimeSeriesRow};
use chrono::{DateTime, DurationRound, RoundingError, TimeDelta, Utc};
use std::collections::BTreeMap;

struct Bucket {
    site_code: Option<String>,
    depth_cm: Option<f64>,
    sums: Vec<f64>,
    counts: Vec<usize>,
}

impl Bucket {
    fn new(width: usize) -> Self {
        Self {
            site_code: None,
            depth_cm: None,
            sums: vec![0.0; width],
            counts: vec![0; width],
        }
    }

    fn add(&mut self, row: &TimeSeriesRow) {
        if self.site_code.is_none() && !row.site_code.is_empty() {
            self.site_code = Some(row.site_code.clone());
        }
        if self.depth_cm.is_none() {
            self.depth_cm = row.depth_cm;
        }
        for (i, value) in row.values.iter().enumerate().take(self.sums.len()) {
            if let Some(v) = value.filter(|v| !v.is_nan()) {
                self.sums[i] += v;
                self.counts[i] += 1;
            }
        }
    }

    /// `None` when every column in the bucket is null
    fn into_row(self, timestamp: DateTime<Utc>) -> Option<TimeSeriesRow> {
        let values: Vec<Option<f64>> = self
            .sums
            .iter()
            .zip(&self.counts)
            .map(|(&sum, &n)| (n > 0).then(|| sum / n as f64))
            .collect();

        if values.iter().all(Option::is_none) {
            return None;
        }

        Some(TimeSeriesRow::new(
            timestamp,
            self.site_code.unwrap_or_default(),
            self.depth_cm,
            values,
        ))
    }
}

/// Resample each group onto the configured bucket width, averaging value
/// columns. Raw configs return the dataset unchanged. A group whose buckets
/// cannot be computed is dropped with a warning.
pub fn aggregate(dataset: &Dataset, config: &ResolutionConfig, group_columns: &[GroupColumn]) -> Dataset {
    let Some(width) = config.aggregation_method.bucket_width() else {
        return dataset.clone();
    };

    let mut rows = Vec::new();
    for (key, indices) in dataset.partition(group_columns) {
        match aggregate_group(dataset, &indices, width) {
            Ok(group_rows) => rows.extend(group_rows),
            Err(e) => {
                tracing::warn!(
                    site = ?key.site,
                    depth = ?key.depth,
                    method = config.aggregation_method.as_str(),
                    "Skipping group during aggregation: {}",
                    e
                );
            }
        }
    }

    let mut aggregated = Dataset::new(dataset.value_columns.clone(), rows);
    aggregated.sort_by_time();

    tracing::debug!(
        input = dataset.len(),
        output = aggregated.len(),
        method = config.aggregation_method.as_str(),
        "Aggregated dataset"
    );

    aggregated
}

fn aggregate_group(
    dataset: &Dataset,
    indices: &[usize],
    width: TimeDelta,
) -> Result<Vec<TimeSeriesRow>, RoundingError> {
    let columns = dataset.value_columns.len();
    let mut buckets: BTreeMap<DateTime<Utc>, Bucket> = BTreeMap::new();

    for &i in indices {
        let row = &dataset.rows[i];
        let start = row.timestamp.duration_trunc(width)?;
        buckets
            .entry(start)
            .or_insert_with(|| Bucket::new(columns))
            .add(row);
    }

    Ok(buckets
        .into_iter()
        .filter_map(|(start, bucket)| bucket.into_row(start))
        .collect())
}
