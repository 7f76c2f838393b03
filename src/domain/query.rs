// Request vocabulary - datasets, site selections, time ranges
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use super::timeseries::GroupColumn;

/// Window used when a time range label is missing or unrecognised
pub const DEFAULT_RANGE_DAYS: i64 = 7;

/// Sensor datasets served by the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    WaterQuality,
    /// Redox potential profiles, one series per probe depth
    Redox,
}

impl DatasetKind {
    pub fn endpoint(&self) -> &'static str {
        match self {
            DatasetKind::WaterQuality => "water_quality",
            DatasetKind::Redox => "redox",
        }
    }

    pub fn sampling_group(&self) -> GroupColumn {
        match self {
            DatasetKind::WaterQuality => GroupColumn::SiteCode,
            DatasetKind::Redox => GroupColumn::SiteAndDepth,
        }
    }

    pub fn aggregation_groups(&self) -> &'static [GroupColumn] {
        match self {
            DatasetKind::WaterQuality => &[GroupColumn::SiteCode],
            DatasetKind::Redox => &[GroupColumn::SiteCode, GroupColumn::DepthCm],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthFilter {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl DepthFilter {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// Normalised site codes: trimmed, uppercased, de-duplicated and sorted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteSelection {
    codes: Vec<String>,
}

impl SiteSelection {
    pub fn from_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let codes: BTreeSet<String> = items
            .into_iter()
            .map(|s| s.as_ref().trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            codes: codes.into_iter().collect(),
        }
    }

    /// Comma-separated form, as sent in query strings
    pub fn parse_csv(value: &str) -> Self {
        Self::from_list(value.split(','))
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Recognised relative ranges: canonical code, span in days, accepted spellings
const RELATIVE_RANGES: &[(&str, i64, &[&str])] = &[
    ("1d", 1, &["last 24 hours", "24h", "last day", "today", "1 day"]),
    ("7d", 7, &["last 7 days", "last week", "1w", "week", "7 days"]),
    ("30d", 30, &["last 30 days", "last month", "1m", "month", "30 days"]),
    ("90d", 90, &["last 90 days", "last 3 months", "3m", "quarter", "90 days"]),
    ("180d", 180, &["last 6 months", "last 180 days", "6m", "180 days"]),
    ("365d", 365, &["last year", "last 365 days", "1y", "year", "365 days"]),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeRange {
    Relative { code: &'static str, days: i64 },
    AllTime,
    /// Explicit start/end dates supplied by the caller
    Custom,
    /// Label we do not know; kept so it never shares a key with a known range
    Unrecognized(String),
}

impl TimeRange {
    pub fn parse(label: &str) -> Self {
        let normalized = normalize_label(label);
        if normalized.is_empty() {
            return TimeRange::Relative {
                code: "7d",
                days: DEFAULT_RANGE_DAYS,
            };
        }

        match normalized.as_str() {
            "all" | "all time" | "all data" => return TimeRange::AllTime,
            "custom" | "custom range" => return TimeRange::Custom,
            _ => {}
        }

        for &(code, days, aliases) in RELATIVE_RANGES {
            if normalized == code || aliases.contains(&normalized.as_str()) {
                return TimeRange::Relative { code, days };
            }
        }

        TimeRange::Unrecognized(normalized.replace(' ', "-"))
    }

    pub fn code(&self) -> &str {
        match self {
            TimeRange::Relative { code, .. } => code,
            TimeRange::AllTime => "all",
            TimeRange::Custom => "custom",
            TimeRange::Unrecognized(label) => label,
        }
    }

    /// Days covered when the range is anchored to now
    pub fn relative_days(&self) -> Option<i64> {
        match self {
            TimeRange::Relative { days, .. } => Some(*days),
            TimeRange::Unrecognized(_) => Some(DEFAULT_RANGE_DAYS),
            TimeRange::AllTime | TimeRange::Custom => None,
        }
    }

    /// Absolute window for this range. Explicit dates win over computed ones.
    pub fn resolve(
        &self,
        start_date: Option<&str>,
        end_date: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TimeWindow, InvalidTimeWindow> {
        let explicit_start = non_blank(start_date).map(|s| parse_date(s, false)).transpose()?;
        let explicit_end = non_blank(end_date).map(|s| parse_date(s, true)).transpose()?;

        let end = explicit_end.unwrap_or(now);
        let start = match (explicit_start, self) {
            (Some(start), _) => Some(start),
            (None, TimeRange::Custom) => return Err(InvalidTimeWindow::MissingStart),
            (None, TimeRange::AllTime) => None,
            (None, range) => range
                .relative_days()
                .map(|days| end - TimeDelta::days(days)),
        };

        if let Some(start) = start {
            if start > end {
                return Err(InvalidTimeWindow::Reversed { start, end });
            }
        }

        Ok(TimeWindow { start, end })
    }
}

/// Lowercase, `_` as space, single spaces
fn normalize_label(label: &str) -> String {
    label
        .to_lowercase()
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    /// `None` for open-ended "all time" requests
    pub start: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq)]
pub enum InvalidTimeWindow {
    #[error("invalid date '{0}', expected YYYY-MM-DD or RFC 3339")]
    BadDate(String),
    #[error("a custom time range requires start_date")]
    MissingStart,
    #[error("start_date {start} is after end_date {end}")]
    Reversed {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Parse a request date. Bare dates expand to the start of the day, or to the
/// last second of it when `end_of_day` is set.
pub fn parse_date(value: &str, end_of_day: bool) -> Result<DateTime<Utc>, InvalidTimeWindow> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| InvalidTimeWindow::BadDate(value.to_string()))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };

    time.map(|t| t.and_utc())
        .ok_or_else(|| InvalidTimeWindow::BadDate(value.to_string()))
}
