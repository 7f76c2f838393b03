// Resolution vocabulary - performance modes, aggregation tiers, fidelity
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Client hint trading detail for payload size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMode {
    Fast,
    #[default]
    Balanced,
    HighDetail,
    /// Raw data, no aggregation and no downsampling
    Maximum,
}

impl PerformanceMode {
    /// Unknown or empty values fall back to `Balanced`
    pub fn parse(value: &str) -> Self {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "fast" => PerformanceMode::Fast,
            "balanced" => PerformanceMode::Balanced,
            "high_detail" | "highdetail" | "detailed" => PerformanceMode::HighDetail,
            "maximum" | "max" => PerformanceMode::Maximum,
            _ => PerformanceMode::Balanced,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceMode::Fast => "fast",
            PerformanceMode::Balanced => "balanced",
            PerformanceMode::HighDetail => "high_detail",
            PerformanceMode::Maximum => "maximum",
        }
    }
}

/// Aggregation tier, declared from finest to coarsest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AggregationMethod {
    #[serde(rename = "raw")]
    Raw,
    #[serde(rename = "mean-15min")]
    FifteenMinute,
    #[serde(rename = "mean-hourly")]
    Hourly,
    #[serde(rename = "mean-daily")]
    Daily,
}

impl AggregationMethod {
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        let normalized = normalized
            .strip_prefix("mean-")
            .unwrap_or(normalized.as_str());
        match normalized {
            "raw" | "none" => Some(AggregationMethod::Raw),
            "15min" | "15m" | "fifteen_minute" => Some(AggregationMethod::FifteenMinute),
            "hourly" | "1h" | "hour" => Some(AggregationMethod::Hourly),
            "daily" | "1d" | "day" => Some(AggregationMethod::Daily),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMethod::Raw => "raw",
            AggregationMethod::FifteenMinute => "mean-15min",
            AggregationMethod::Hourly => "mean-hourly",
            AggregationMethod::Daily => "mean-daily",
        }
    }

    /// Bucket width, `None` for raw
    pub fn bucket_width(&self) -> Option<TimeDelta> {
        match self {
            AggregationMethod::Raw => None,
            AggregationMethod::FifteenMinute => Some(TimeDelta::minutes(15)),
            AggregationMethod::Hourly => Some(TimeDelta::hours(1)),
            AggregationMethod::Daily => Some(TimeDelta::days(1)),
        }
    }
}

/// Per-request output of the resolution policy. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionConfig {
    pub aggregation_method: AggregationMethod,
    pub performance_tier: PerformanceMode,
    pub target_points: usize,
    /// False in maximum mode or when the caller opted out
    pub downsample: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fidelity {
    #[default]
    Standard,
    Maximum,
}

impl Fidelity {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "max" | "maximum" | "full" => Fidelity::Maximum,
            _ => Fidelity::Standard,
        }
    }
}
