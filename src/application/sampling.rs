// Sampling engine - point-budget reduction that keeps extrema, endpoints and groups
use crate::domain::timeseries::{Dataset, GroupColumn, GroupKey};
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;

/// Rows above which the rolling-window fallback refuses to run
pub const DEFAULT_ROLLING_ROW_LIMIT: usize = 20_000;

/// Columns with this many non-null values or fewer are not scanned for extrema
pub const DEFAULT_MIN_NON_NULL: usize = 10;

#[derive(Debug, Error, PartialEq)]
pub enum PeakDetectionError {
    #[error("{rows} rows exceeds the rolling-window limit of {limit}")]
    TooLarge { rows: usize, limit: usize },
}

/// Finds local peaks and valleys in a gap-free series.
///
/// Index `i` is a peak when `values[i]` is the maximum of the window
/// `[i - half_window, i + half_window]` and rises above `values[i - 1]`, so a
/// flat plateau contributes only its leading edge. Valleys mirror this.
pub trait PeakFinder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sorted, de-duplicated indices of peaks and valleys
    fn find_extrema(&self, values: &[f64], half_window: usize)
    -> Result<Vec<usize>, PeakDetectionError>;
}

/// Monotonic-deque sliding window, linear in the series length
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanPeakFinder;

impl PeakFinder for ScanPeakFinder {
    fn name(&self) -> &'static str {
        "scan"
    }

    fn find_extrema(
        &self,
        values: &[f64],
        half_window: usize,
    ) -> Result<Vec<usize>, PeakDetectionError> {
        let maxima = sliding_best(values, half_window, |new, old| new >= old);
        let minima = sliding_best(values, half_window, |new, old| new <= old);

        Ok(classify(values, |i| (maxima[i], minima[i])))
    }
}

/// Direct window comparison per point. Cost grows with the window, so it
/// gives up above `row_limit` rows.
#[derive(Debug, Clone, Copy)]
pub struct RollingWindowPeakFinder {
    pub row_limit: usize,
}

impl PeakFinder for RollingWindowPeakFinder {
    fn name(&self) -> &'static str {
        "rolling"
    }

    fn find_extrema(
        &self,
        values: &[f64],
        half_window: usize,
    ) -> Result<Vec<usize>, PeakDetectionError> {
        if values.len() > self.row_limit {
            return Err(PeakDetectionError::TooLarge {
                rows: values.len(),
                limit: self.row_limit,
            });
        }

        let last = values.len().saturating_sub(1);
        Ok(classify(values, |i| {
            let window = &values[i.saturating_sub(half_window)..=(i + half_window).min(last)];
            let max = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let min = window.iter().copied().fold(f64::INFINITY, f64::min);
            (max, min)
        }))
    }
}

/// Best value of each centred window. `keep(new, old)` says whether `new`
/// makes `old` irrelevant.
fn sliding_best(values: &[f64], half_window: usize, keep: fn(f64, f64) -> bool) -> Vec<f64> {
    let n = values.len();
    let mut best = Vec::with_capacity(n);
    let mut deque: VecDeque<usize> = VecDeque::new();

    for right in 0..n + half_window {
        if right < n {
            while let Some(&back) = deque.back() {
                if keep(values[right], values[back]) {
                    deque.pop_back();
                } else {
                    break;
                }
            }
            deque.push_back(right);
        }

        if right >= half_window {
            let center = right - half_window;
            while let Some(&front) = deque.front() {
                if front + half_window < center {
                    deque.pop_front();
                } else {
                    break;
                }
            }
            if let Some(&front) = deque.front() {
                best.push(values[front]);
            }
        }
    }

    best
}

fn classify(values: &[f64], window_bounds: impl Fn(usize) -> (f64, f64)) -> Vec<usize> {
    let mut extrema = Vec::new();
    for (i, &v) in values.iter().enumerate() {
        let (max, min) = window_bounds(i);
        let prev = if i == 0 { None } else { Some(values[i - 1]) };

        let is_peak = v == max && prev.is_none_or(|p| v > p);
        let is_valley = v == min && prev.is_none_or(|p| v < p);
        if is_peak || is_valley {
            extrema.push(i);
        }
    }
    extrema
}

/// Which peak finder to build at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtremaStrategy {
    #[default]
    Scan,
    Rolling,
}

pub fn peak_finder_for(strategy: ExtremaStrategy, rolling_row_limit: usize) -> Arc<dyn PeakFinder> {
    match strategy {
        ExtremaStrategy::Scan => Arc::new(ScanPeakFinder),
        ExtremaStrategy::Rolling => Arc::new(RollingWindowPeakFinder {
            row_limit: rolling_row_limit,
        }),
    }
}

#[derive(Debug, Clone)]
pub struct SampleOutcome {
    pub dataset: Dataset,
    /// Extrema detection was skipped for at least one column
    pub extrema_skipped: bool,
}

#[derive(Clone)]
pub struct Sampler {
    peak_finder: Arc<dyn PeakFinder>,
    min_non_null: usize,
}

impl Sampler {
    pub fn new(peak_finder: Arc<dyn PeakFinder>, min_non_null: usize) -> Self {
        Self {
            peak_finder,
            min_non_null,
        }
    }

    /// Reduce a time-sorted dataset to at most `target_size` rows (two when
    /// `target_size` is 1, since the first and last rows are always kept).
    ///
    /// Selection is the union of a global systematic sample, a systematic
    /// sample per group of `group_column`, and the peaks/valleys of each
    /// value column. Pinned rows (endpoints, then one row per group) survive
    /// truncation; the rest of the budget goes to the earliest selected rows.
    pub fn downsample(
        &self,
        dataset: &Dataset,
        target_size: usize,
        group_column: Option<GroupColumn>,
        value_columns: &[String],
    ) -> SampleOutcome {
        let n = dataset.len();
        let target = target_size.max(1);

        if n <= target {
            return SampleOutcome {
                dataset: dataset.clone(),
                extrema_skipped: false,
            };
        }

        let mut selected = BTreeSet::new();

        let stride = (n / target).max(1);
        selected.extend((0..n).step_by(stride));

        let groups = group_column
            .map(|col| dataset.partition(&[col]))
            .unwrap_or_default();

        if groups.len() > 1 {
            let per_group = (target / groups.len()).max(1);
            for (_, indices) in &groups {
                let group_stride = (indices.len() / per_group).max(1);
                selected.extend(indices.iter().step_by(group_stride).copied());
            }
            tracing::debug!(
                groups = groups.len(),
                per_group,
                "Allocated per-group sample share"
            );
        }

        let mut extrema_skipped = false;
        for column in value_columns {
            match self.column_extrema(dataset, column) {
                Ok(indices) => selected.extend(indices),
                Err(e) => {
                    tracing::warn!(
                        column = %column,
                        strategy = self.peak_finder.name(),
                        "Skipping extrema detection: {}",
                        e
                    );
                    extrema_skipped = true;
                }
            }
        }

        selected.insert(0);
        selected.insert(n - 1);

        let pinned = pinned_rows(dataset, group_column, &groups, target.max(2));
        let kept = truncate(selected, pinned, target);

        tracing::debug!(
            input = n,
            output = kept.len(),
            target,
            "Downsampled dataset"
        );

        SampleOutcome {
            dataset: dataset.select(&kept),
            extrema_skipped,
        }
    }

    fn column_extrema(&self, dataset: &Dataset, column: &str) -> Result<Vec<usize>, PeakDetectionError> {
        let Some(index) = dataset.column_index(column) else {
            return Ok(Vec::new());
        };

        let raw = dataset.column(index);
        let non_null = raw.iter().filter(|v| v.is_some()).count();
        if non_null <= self.min_non_null {
            return Ok(Vec::new());
        }

        let Some(filled) = fill_gaps(&raw) else {
            return Ok(Vec::new());
        };
        let half_window = (filled.len() / 100).max(1);

        self.peak_finder.find_extrema(&filled, half_window)
    }
}

/// Forward fill, then backward fill the leading gap. `None` when every value is missing.
fn fill_gaps(values: &[Option<f64>]) -> Option<Vec<f64>> {
    let first = values.iter().flatten().copied().next()?;
    let mut last = first;
    Some(
        values
            .iter()
            .map(|v| {
                if let Some(v) = v {
                    last = *v;
                }
                last
            })
            .collect(),
    )
}

/// First row, last row, then the first row of each group the endpoints do not
/// already represent, while the budget allows
fn pinned_rows(
    dataset: &Dataset,
    group_column: Option<GroupColumn>,
    groups: &[(GroupKey, Vec<usize>)],
    budget: usize,
) -> BTreeSet<usize> {
    let n = dataset.len();
    let mut pinned = BTreeSet::from([0, n - 1]);

    if let Some(col) = group_column {
        if groups.len() > 1 {
            let represented: HashSet<_> = [0, n - 1]
                .iter()
                .map(|&i| col.key_of(&dataset.rows[i]))
                .collect();

            for (key, indices) in groups {
                if pinned.len() >= budget {
                    break;
                }
                if !represented.contains(key) {
                    pinned.insert(indices[0]);
                }
            }
        }
    }

    pinned
}

fn truncate(selected: BTreeSet<usize>, pinned: BTreeSet<usize>, target: usize) -> Vec<usize> {
    let limit = target.max(pinned.len());
    if selected.len() <= limit && pinned.is_subset(&selected) {
        return selected.into_iter().collect();
    }

    let mut kept = pinned;
    for i in selected {
        if kept.len() >= limit {
            break;
        }
        kept.insert(i);
    }
    kept.into_iter().collect()
}
