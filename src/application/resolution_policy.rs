// Resolution policy - picks an aggregation tier and point budget for a time span
use crate::domain::resolution::{AggregationMethod, PerformanceMode, ResolutionConfig};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// One row of a tier table: spans up to `max_days` use `method` and `target_points`.
/// A rule without `max_days` catches every longer span.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TierRule {
    #[serde(default)]
    pub max_days: Option<f64>,
    pub method: AggregationMethod,
    pub target_points: usize,
}

impl TierRule {
    fn new(max_days: Option<f64>, method: AggregationMethod, target_points: usize) -> Self {
        Self {
            max_days,
            method,
            target_points,
        }
    }
}

/// Tier tables per performance mode. Maximum mode has no table: it is always raw.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TierTables {
    pub fast: Vec<TierRule>,
    pub balanced: Vec<TierRule>,
    pub high_detail: Vec<TierRule>,
}

impl Default for TierTables {
    fn default() -> Self {
        use AggregationMethod::*;
        Self {
            fast: vec![
                TierRule::new(Some(1.0), FifteenMinute, 1_500),
                TierRule::new(Some(14.0), Hourly, 1_500),
                TierRule::new(None, Daily, 1_000),
            ],
            balanced: vec![
                TierRule::new(Some(3.0), Raw, 5_000),
                TierRule::new(Some(30.0), FifteenMinute, 5_000),
                TierRule::new(Some(180.0), Hourly, 5_000),
                TierRule::new(None, Daily, 3_000),
            ],
            high_detail: vec![
                TierRule::new(Some(7.0), Raw, 10_000),
                TierRule::new(Some(90.0), FifteenMinute, 10_000),
                TierRule::new(Some(365.0), Hourly, 10_000),
                TierRule::new(None, Daily, 8_000),
            ],
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum InvalidTierTable {
    #[error("{mode} table is empty")]
    Empty { mode: &'static str },
    #[error("{mode} table: span bounds must increase")]
    UnorderedSpans { mode: &'static str },
    #[error("{mode} table: a longer span selects a finer tier")]
    FinerTier { mode: &'static str },
    #[error("{mode} table: a longer span gets more points")]
    MorePoints { mode: &'static str },
}

impl TierTables {
    /// Longer spans must never get finer tiers or larger budgets
    pub fn validate(&self) -> Result<(), InvalidTierTable> {
        for (mode, rules) in [
            ("fast", &self.fast),
            ("balanced", &self.balanced),
            ("high_detail", &self.high_detail),
        ] {
            if rules.is_empty() {
                return Err(InvalidTierTable::Empty { mode });
            }

            for pair in rules.windows(2) {
                let (shorter, longer) = (&pair[0], &pair[1]);
                match (shorter.max_days, longer.max_days) {
                    (Some(a), Some(b)) if a < b => {}
                    (Some(_), None) => {}
                    _ => return Err(InvalidTierTable::UnorderedSpans { mode }),
                }
                if longer.method < shorter.method {
                    return Err(InvalidTierTable::FinerTier { mode });
                }
                if longer.target_points > shorter.target_points {
                    return Err(InvalidTierTable::MorePoints { mode });
                }
            }
        }
        Ok(())
    }

    fn rules_for(&self, mode: PerformanceMode) -> &[TierRule] {
        match mode {
            PerformanceMode::Fast => &self.fast,
            PerformanceMode::HighDetail => &self.high_detail,
            PerformanceMode::Balanced | PerformanceMode::Maximum => &self.balanced,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolutionPolicy {
    tables: TierTables,
    maximum_points: usize,
}

impl ResolutionPolicy {
    /// Invalid tables are replaced by the defaults so lookups never fail
    pub fn new(tables: TierTables, maximum_points: usize) -> Self {
        let tables = match tables.validate() {
            Ok(()) => tables,
            Err(e) => {
                tracing::warn!("Ignoring configured resolution tiers: {}", e);
                TierTables::default()
            }
        };

        Self {
            tables,
            maximum_points,
        }
    }

    pub fn get_optimal_resolution(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        mode: PerformanceMode,
    ) -> ResolutionConfig {
        if mode == PerformanceMode::Maximum {
            return ResolutionConfig {
                aggregation_method: AggregationMethod::Raw,
                performance_tier: PerformanceMode::Maximum,
                target_points: self.maximum_points,
                downsample: false,
            };
        }

        let days = span_days(start, end);
        let rules = self.tables.rules_for(mode);
        let rule = rules
            .iter()
            .find(|r| r.max_days.is_none_or(|max| days <= max))
            .or(rules.last());

        // Tables are validated non-empty, so `rule` is always present
        let (method, target_points) = rule
            .map(|r| (r.method, r.target_points))
            .unwrap_or((AggregationMethod::Raw, self.maximum_points));

        tracing::debug!(
            days,
            mode = mode.as_str(),
            method = method.as_str(),
            target_points,
            "Selected resolution"
        );

        ResolutionConfig {
            aggregation_method: method,
            performance_tier: mode,
            target_points,
            downsample: true,
        }
    }
}

/// Span in fractional days; reversed windows count as their swapped form
pub fn span_days(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_seconds().unsigned_abs() as f64 / 86_400.0
}
