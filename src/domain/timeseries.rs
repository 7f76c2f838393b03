// Time-series domain models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Column a dataset can be partitioned by when sampling or aggregating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupColumn {
    SiteCode,
    DepthCm,
    /// Site and depth together, one group per sensor position
    SiteAndDepth,
}

/// Partition key of a row. Depth is kept in hundredths of a centimetre so the
/// key is hashable and totally ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub site: Option<String>,
    pub depth: Option<i64>,
}

impl GroupColumn {
    pub fn key_of(&self, row: &TimeSeriesRow) -> GroupKey {
        Self::combined_key(std::slice::from_ref(self), row)
    }

    /// Key over several grouping columns at once
    pub fn combined_key(columns: &[GroupColumn], row: &TimeSeriesRow) -> GroupKey {
        let by_site = columns
            .iter()
            .any(|c| matches!(c, GroupColumn::SiteCode | GroupColumn::SiteAndDepth));
        let by_depth = columns
            .iter()
            .any(|c| matches!(c, GroupColumn::DepthCm | GroupColumn::SiteAndDepth));

        GroupKey {
            site: by_site.then(|| row.site_code.clone()),
            depth: if by_depth { depth_key(row.depth_cm) } else { None },
        }
    }
}

fn depth_key(depth_cm: Option<f64>) -> Option<i64> {
    depth_cm
        .filter(|d| d.is_finite())
        .map(|d| (d * 100.0).round() as i64)
}

/// One sensor observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRow {
    pub timestamp: DateTime<Utc>,
    pub site_code: String,
    pub depth_cm: Option<f64>,
    /// One entry per dataset value column, in schema order
    pub values: Vec<Option<f64>>,
}

impl TimeSeriesRow {
    pub fn new(
        timestamp: DateTime<Utc>,
        site_code: impl Into<String>,
        depth_cm: Option<f64>,
        values: Vec<Option<f64>>,
    ) -> Self {
        Self {
            timestamp,
            site_code: site_code.into(),
            depth_cm,
            values,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{operation} requires at least {required} rows, but only {actual} available")]
pub struct InsufficientData {
    pub operation: String,
    pub required: usize,
    pub actual: usize,
}

/// Ordered collection of rows sharing one set of value columns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub value_columns: Vec<String>,
    pub rows: Vec<TimeSeriesRow>,
}

impl Dataset {
    pub fn new(value_columns: Vec<String>, rows: Vec<TimeSeriesRow>) -> Self {
        Self {
            value_columns,
            rows,
        }
    }

    #[cfg(test)]
    pub fn empty(value_columns: Vec<String>) -> Self {
        Self::new(value_columns, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.value_columns.iter().position(|c| c == name)
    }

    /// Values of one column, NaN treated as missing
    pub fn column(&self, index: usize) -> Vec<Option<f64>> {
        self.rows
            .iter()
            .map(|r| r.values.get(index).copied().flatten().filter(|v| !v.is_nan()))
            .collect()
    }

    /// Stable sort by timestamp, then site and depth
    pub fn sort_by_time(&mut self) {
        self.rows.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.site_code.cmp(&b.site_code))
                .then_with(|| cmp_depth(a.depth_cm, b.depth_cm))
        });
    }

    #[cfg(test)]
    pub fn is_sorted_by_time(&self) -> bool {
        self.rows.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
    }

    /// New dataset holding the rows at `indices`, in the given order
    pub fn select(&self, indices: &[usize]) -> Dataset {
        let rows = indices
            .iter()
            .filter_map(|&i| self.rows.get(i).cloned())
            .collect();
        Dataset::new(self.value_columns.clone(), rows)
    }

    pub fn slice(&self, offset: usize, len: usize) -> Dataset {
        let rows = self.rows.iter().skip(offset).take(len).cloned().collect();
        Dataset::new(self.value_columns.clone(), rows)
    }

    /// Distinct group keys in order of first appearance, with the row indices of each
    pub fn partition(&self, columns: &[GroupColumn]) -> Vec<(GroupKey, Vec<usize>)> {
        let mut positions: HashMap<GroupKey, usize> = HashMap::new();
        let mut groups: Vec<(GroupKey, Vec<usize>)> = Vec::new();

        for (i, row) in self.rows.iter().enumerate() {
            let key = GroupColumn::combined_key(columns, row);
            match positions.get(&key) {
                Some(&pos) => groups[pos].1.push(i),
                None => {
                    positions.insert(key.clone(), groups.len());
                    groups.push((key, vec![i]));
                }
            }
        }

        groups
    }

    /// Collapse rows sharing (site, depth, timestamp) into their mean
    pub fn dedupe(self) -> Dataset {
        let width = self.value_columns.len();
        let mut positions: HashMap<(String, Option<i64>, DateTime<Utc>), usize> = HashMap::new();
        let mut merged: Vec<(TimeSeriesRow, Vec<(f64, usize)>)> = Vec::with_capacity(self.rows.len());

        for row in self.rows {
            let key = (row.site_code.clone(), depth_key(row.depth_cm), row.timestamp);
            let pos = match positions.get(&key) {
                Some(&pos) => pos,
                None => {
                    positions.insert(key, merged.len());
                    merged.push((row.clone(), vec![(0.0, 0); width]));
                    merged.len() - 1
                }
            };

            let sums = &mut merged[pos].1;
            for (slot, value) in sums.iter_mut().zip(row.values.iter()) {
                if let Some(v) = value.filter(|v| !v.is_nan()) {
                    slot.0 += v;
                    slot.1 += 1;
                }
            }
        }

        let rows = merged
            .into_iter()
            .map(|(mut row, sums)| {
                row.values = sums
                    .into_iter()
                    .map(|(sum, n)| (n > 0).then(|| sum / n as f64))
                    .collect();
                row
            })
            .collect();

        let mut deduped = Dataset::new(self.value_columns, rows);
        deduped.sort_by_time();
        deduped
    }

    /// First and last timestamps of a time-sorted dataset
    pub fn time_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.rows.first()?.timestamp, self.rows.last()?.timestamp))
    }

    pub fn require_rows(&self, operation: &str, required: usize) -> Result<(), InsufficientData> {
        if self.len() < required {
            return Err(InsufficientData {
                operation: operation.to_string(),
                required,
                actual: self.len(),
            });
        }
        Ok(())
    }
}

fn cmp_depth(a: Option<f64>, b: Option<f64>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, minute, 0).unwrap()
    }

    #[test]
    fn test_dedupe_collapses_to_mean() {
        let dataset = Dataset::new(
            vec!["do_mg_l".to_string()],
            vec![
                TimeSeriesRow::new(ts(1), "S1", None, vec![Some(4.0)]),
                TimeSeriesRow::new(ts(0), "S1", None, vec![Some(1.0)]),
                TimeSeriesRow::new(ts(1), "S1", None, vec![Some(6.0)]),
                TimeSeriesRow::new(ts(1), "S1", None, vec![None]),
                TimeSeriesRow::new(ts(1), "S2", None, vec![Some(9.0)]),
            ],
        );

        let deduped = dataset.dedupe();

        assert_eq!(deduped.len(), 3);
        assert_eq!(deduped.rows[0].timestamp, ts(0));
        assert_eq!(deduped.rows[1].site_code, "S1");
        assert_eq!(deduped.rows[1].values, vec![Some(5.0)]);
        assert_eq!(deduped.rows[2].site_code, "S2");
    }

    #[test]
    fn test_dedupe_keeps_depths_apart() {
        let dataset = Dataset::new(
            vec!["eh_mv".to_string()],
            vec![
                TimeSeriesRow::new(ts(0), "S1", Some(10.0), vec![Some(100.0)]),
                TimeSeriesRow::new(ts(0), "S1", Some(30.0), vec![Some(-50.0)]),
            ],
        );

        assert_eq!(dataset.dedupe().len(), 2);
    }

    #[test]
    fn test_partition_first_appearance_order() {
        let dataset = Dataset::new(
            vec![],
            vec![
                TimeSeriesRow::new(ts(0), "B", Some(10.0), vec![]),
                TimeSeriesRow::new(ts(0), "A", Some(10.0), vec![]),
                TimeSeriesRow::new(ts(1), "B", Some(30.0), vec![]),
            ],
        );

        let by_site = dataset.partition(&[GroupColumn::SiteCode]);
        assert_eq!(by_site.len(), 2);
        assert_eq!(by_site[0].0.site.as_deref(), Some("B"));
        assert_eq!(by_site[0].1, vec![0, 2]);

        let by_depth = dataset.partition(&[GroupColumn::DepthCm]);
        assert_eq!(by_depth.len(), 2);
        assert_eq!(by_depth[0].0.depth, Some(1000));

        assert_eq!(dataset.partition(&[GroupColumn::SiteAndDepth]).len(), 3);
    }

    #[test]
    fn test_column_treats_nan_as_missing() {
        let dataset = Dataset::new(
            vec!["ph".to_string()],
            vec![
                TimeSeriesRow::new(ts(0), "S1", None, vec![Some(f64::NAN)]),
                TimeSeriesRow::new(ts(1), "S1", None, vec![Some(7.2)]),
            ],
        );

        assert_eq!(dataset.column(0), vec![None, Some(7.2)]);
    }

    #[test]
    fn test_require_rows() {
        let dataset = Dataset::empty(vec!["ph".to_string()]);
        let err = dataset.require_rows("Trend analysis", 3).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Trend analysis requires at least 3 rows, but only 0 available"
        );
    }
}
