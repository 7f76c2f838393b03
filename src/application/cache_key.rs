// Cache key derivation - stable, discriminating keys for logical data requests
//
// Layout: `{endpoint}:{sites}:{window}:{hash}:{fidelity}`
//
// * sites: normalised site tokens (at most MAX_SITE_TOKENS) or `default`
// * window: range code plus absolute start/end days, computed from the clock
//   for relative ranges so "last 7 days" asked on different days never collide
// * hash: SHA-256 prefix over canonical JSON of the parameters that change
//   which rows are loaded
// * fidelity: `max`, or `std.{mode}.{resolution}.{ds}.{points}` describing how
//   a standard response was reduced
//
// Pagination and presentation fields (chunk_size, offset, format) are left
// out: every chunk of one request shares the entry for the full result, and
// chunks are sliced from it. Per-chunk caching would need them added back.
use crate::application::clock::Clock;
use crate::domain::query::{non_blank, SiteSelection, TimeRange};
use crate::domain::resolution::{AggregationMethod, Fidelity, PerformanceMode};
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub const MAX_SITE_TOKENS: usize = 20;
const MAX_PARAM_LEN: usize = 200;
const HASH_PREFIX_LEN: usize = 16;

/// Parameters that change the loaded rows, hashed into the key
const CONTENT_PARAMS: &[&str] = &["parameters", "depth_min", "depth_max"];

/// Parameters that only slice or re-shape a cached result
const IGNORED_PARAMS: &[&str] = &["chunk_size", "offset", "format"];

/// Request parameters beyond sites and time range, as received
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraParams(BTreeMap<String, String>);

impl ExtraParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into().trim().to_ascii_lowercase(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        non_blank(self.0.get(key).map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FidelityTag {
    /// Reduction profile of a standard response
    Standard(String),
    Maximum,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    base: String,
    fidelity: FidelityTag,
}

impl CacheKey {
    pub fn fidelity(&self) -> Fidelity {
        match self.fidelity {
            FidelityTag::Standard(_) => Fidelity::Standard,
            FidelityTag::Maximum => Fidelity::Maximum,
        }
    }

    /// The same logical request at maximum fidelity
    pub fn as_maximum(&self) -> CacheKey {
        CacheKey {
            base: self.base.clone(),
            fidelity: FidelityTag::Maximum,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.fidelity {
            FidelityTag::Standard(profile) => write!(f, "{}:std.{}", self.base, profile),
            FidelityTag::Maximum => write!(f, "{}:max", self.base),
        }
    }
}

#[derive(Clone)]
pub struct CacheKeyDeriver {
    clock: Arc<dyn Clock>,
}

impl CacheKeyDeriver {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn derive_key(
        &self,
        endpoint: &str,
        sites: &SiteSelection,
        time_range: &str,
        extra: &ExtraParams,
        fidelity: Fidelity,
    ) -> CacheKey {
        let range = TimeRange::parse(time_range);
        let window = window_component(&range, extra, self.clock.now());

        let base = format!(
            "{}:{}:{}:{}",
            normalize_endpoint(endpoint),
            site_token(sites),
            window,
            content_hash(sites, extra)
        );

        let fidelity = match fidelity {
            Fidelity::Maximum => FidelityTag::Maximum,
            Fidelity::Standard => FidelityTag::Standard(reduction_profile(extra)),
        };

        for ignored in IGNORED_PARAMS {
            if extra.get(ignored).is_some() {
                tracing::trace!(param = ignored, "Parameter left out of cache key");
            }
        }

        CacheKey { base, fidelity }
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    let normalized: String = endpoint
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '_' | '-' => c,
            _ => '_',
        })
        .collect();

    if normalized.is_empty() {
        "data".to_string()
    } else {
        normalized
    }
}

fn site_token(sites: &SiteSelection) -> String {
    if sites.is_empty() {
        return "default".to_string();
    }
    sites
        .codes()
        .iter()
        .take(MAX_SITE_TOKENS)
        .map(|s| sanitize(s).replace([':', '-', '*', '?'], "_"))
        .collect::<Vec<_>>()
        .join("-")
}

fn window_component(range: &TimeRange, extra: &ExtraParams, now: DateTime<Utc>) -> String {
    let day = |dt: DateTime<Utc>| dt.format("%Y%m%d").to_string();

    // A missing end date always resolves to now, custom ranges included
    let computed_end = day(now);
    let computed_start = range
        .relative_days()
        .map(|days| day(now - TimeDelta::days(days)));

    let start = extra
        .get("start_date")
        .map(sanitize)
        .or(computed_start)
        .unwrap_or_else(|| "open".to_string());
    let end = extra
        .get("end_date")
        .map(sanitize)
        .unwrap_or(computed_end);

    format!("{}_{}_{}", range.code(), start, end).replace(':', "")
}

fn content_hash(sites: &SiteSelection, extra: &ExtraParams) -> String {
    let mut canonical: BTreeMap<&str, Value> = BTreeMap::new();
    canonical.insert(
        "sites",
        Value::from(sites.codes().iter().map(|s| sanitize(s)).collect::<Vec<_>>()),
    );

    for &name in CONTENT_PARAMS {
        if let Some(value) = extra.get(name) {
            let value = if name == "parameters" {
                normalize_list(value)
            } else {
                sanitize(value)
            };
            canonical.insert(name, Value::from(value));
        }
    }

    // BTreeMap serialises with sorted keys
    let json = serde_json::to_string(&canonical).unwrap_or_default();
    let digest = format!("{:x}", Sha256::digest(json.as_bytes()));
    digest[..HASH_PREFIX_LEN].to_string()
}

fn reduction_profile(extra: &ExtraParams) -> String {
    let mode = PerformanceMode::parse(extra.get("performance_mode").unwrap_or_default());
    let resolution = extra
        .get("resolution")
        .and_then(AggregationMethod::parse)
        .map(|m| m.as_str())
        .unwrap_or("auto");
    let downsample = match extra.get("downsample").map(parse_flag) {
        Some(Some(false)) => "nods",
        _ => "ds",
    };
    let points = extra
        .get("max_points")
        .and_then(|p| p.parse::<usize>().ok())
        .map(|p| p.to_string())
        .unwrap_or_else(|| "auto".to_string());

    format!("{}.{}.{}.{}", mode.as_str(), resolution, downsample, points)
}

pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Trim, collapse internal whitespace and cap the length
fn sanitize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(MAX_PARAM_LEN)
        .collect()
}

/// Comma-separated list in canonical order
fn normalize_list(value: &str) -> String {
    let mut items: Vec<String> = value
        .split(',')
        .map(sanitize)
        .filter(|s| !s.is_empty())
        .collect();
    items.sort();
    items.dedup();
    sanitize(&items.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::clock::FixedClock;
    use chrono::TimeZone;

    fn deriver_at(y: i32, m: u32, d: u32) -> CacheKeyDeriver {
        let now = Utc.with_ymd_and_hms(y, m, d, 9, 30, 0).unwrap();
        CacheKeyDeriver::new(Arc::new(FixedClock(now)))
    }

    fn deriver() -> CacheKeyDeriver {
        deriver_at(2024, 6, 15)
    }

    fn key(sites: &[&str], range: &str, extra: &ExtraParams, fidelity: Fidelity) -> String {
        deriver()
            .derive_key("water_quality", &SiteSelection::from_list(sites), range, extra, fidelity)
            .to_string()
    }

    #[test]
    fn test_equivalent_requests_share_key() {
        let a = key(&["S2", "S1"], "Last 7 Days", &ExtraParams::new(), Fidelity::Standard);
        let b = key(&["s1", "S2"], "7d", &ExtraParams::new(), Fidelity::Standard);
        assert_eq!(a, b);
    }

    #[test]
    fn test_parameter_order_and_whitespace_ignored() {
        let a = ExtraParams::new()
            .with("parameters", "ph, temp_c")
            .with("performance_mode", "Balanced");
        let b = ExtraParams::new()
            .with("Performance_Mode", " balanced ")
            .with("parameters", "temp_c,ph,ph");
        assert_eq!(
            key(&["S1"], "30d", &a, Fidelity::Standard),
            key(&["S1"], "30d", &b, Fidelity::Standard)
        );
    }

    #[test]
    fn test_custom_dates_discriminate() {
        let jan = ExtraParams::new()
            .with("start_date", "2024-01-01")
            .with("end_date", "2024-01-31");
        let feb = ExtraParams::new()
            .with("start_date", "2024-01-01")
            .with("end_date", "2024-02-28");
        assert_ne!(
            key(&["S1"], "custom", &jan, Fidelity::Standard),
            key(&["S1"], "custom", &feb, Fidelity::Standard)
        );
    }

    #[test]
    fn test_relative_range_folds_computed_dates() {
        let extra = ExtraParams::new();
        let sites = SiteSelection::from_list(["S1"]);
        let monday = deriver_at(2024, 6, 17).derive_key("wq", &sites, "7d", &extra, Fidelity::Standard);
        let tuesday = deriver_at(2024, 6, 18).derive_key("wq", &sites, "7d", &extra, Fidelity::Standard);

        assert_ne!(monday, tuesday);
        assert!(monday.to_string().contains("7d_20240610_20240617"));
    }

    #[test]
    fn test_custom_range_without_end_folds_today() {
        let extra = ExtraParams::new().with("start_date", "2024-01-01");
        let sites = SiteSelection::from_list(["S1"]);
        let early = deriver_at(2024, 6, 1).derive_key("wq", &sites, "custom", &extra, Fidelity::Standard);
        let late = deriver_at(2024, 6, 20).derive_key("wq", &sites, "custom", &extra, Fidelity::Standard);

        assert_ne!(early, late);
        assert!(late.to_string().contains("custom_2024-01-01_20240620"));
    }

    #[test]
    fn test_content_parameters_discriminate() {
        let base = ExtraParams::new().with("parameters", "ph");
        let other = ExtraParams::new().with("parameters", "ph,turbidity");
        let deep = ExtraParams::new().with("parameters", "ph").with("depth_min", "20");
        let keys = [
            key(&["S1"], "7d", &base, Fidelity::Standard),
            key(&["S1"], "7d", &other, Fidelity::Standard),
            key(&["S1"], "7d", &deep, Fidelity::Standard),
            key(&["S1", "S2"], "7d", &base, Fidelity::Standard),
        ];
        for i in 0..keys.len() {
            for j in (i + 1)..keys.len() {
                assert_ne!(keys[i], keys[j]);
            }
        }
    }

    #[test]
    fn test_reduction_knobs_discriminate_standard_keys() {
        let fast = ExtraParams::new().with("performance_mode", "fast");
        let balanced = ExtraParams::new().with("performance_mode", "balanced");
        let no_ds = ExtraParams::new().with("downsample", "false");
        let hourly = ExtraParams::new().with("resolution", "hourly");

        let keys = [
            key(&["S1"], "7d", &fast, Fidelity::Standard),
            key(&["S1"], "7d", &balanced, Fidelity::Standard),
            key(&["S1"], "7d", &no_ds, Fidelity::Standard),
            key(&["S1"], "7d", &hourly, Fidelity::Standard),
        ];
        for i in 0..keys.len() {
            for j in (i + 1)..keys.len() {
                assert_ne!(keys[i], keys[j]);
            }
        }
    }

    #[test]
    fn test_pagination_fields_excluded() {
        let plain = ExtraParams::new();
        let chunked = ExtraParams::new()
            .with("chunk_size", "500")
            .with("offset", "1000")
            .with("format", "columnar");
        assert_eq!(
            key(&["S1"], "7d", &plain, Fidelity::Standard),
            key(&["S1"], "7d", &chunked, Fidelity::Standard)
        );
    }

    #[test]
    fn test_fidelity_swap() {
        let extra = ExtraParams::new().with("performance_mode", "fast");
        let sites = SiteSelection::from_list(["S1"]);
        let std_key = deriver().derive_key("redox", &sites, "30d", &extra, Fidelity::Standard);
        let max_key = deriver().derive_key("redox", &sites, "30d", &extra, Fidelity::Maximum);

        assert_eq!(std_key.fidelity(), Fidelity::Standard);
        assert_eq!(std_key.as_maximum(), max_key);
        assert!(max_key.to_string().ends_with(":max"));
        assert!(std_key.to_string().ends_with(":std.fast.auto.ds.auto"));
    }

    #[test]
    fn test_site_token_capped_but_hash_sees_all() {
        let many: Vec<String> = (0..25).map(|i| format!("S{:02}", i)).collect();
        let mut fewer = many.clone();
        fewer.pop();

        let a = deriver().derive_key(
            "wq",
            &SiteSelection::from_list(&many),
            "7d",
            &ExtraParams::new(),
            Fidelity::Standard,
        );
        let b = deriver().derive_key(
            "wq",
            &SiteSelection::from_list(&fewer),
            "7d",
            &ExtraParams::new(),
            Fidelity::Standard,
        );

        assert_ne!(a, b);
        let token = a.to_string().split(':').nth(1).unwrap_or_default().to_string();
        assert_eq!(token.split('-').count(), MAX_SITE_TOKENS);
    }

    #[test]
    fn test_empty_sites_use_default_token() {
        let k = key(&[], "all", &ExtraParams::new(), Fidelity::Maximum);
        assert!(k.starts_with("water_quality:default:all_open_20240615:"));
    }

    #[test]
    fn test_long_values_are_capped() {
        let long = "x".repeat(5_000);
        let extra = ExtraParams::new().with("start_date", long.clone()).with("end_date", long);
        let k = key(&["S1"], "custom", &extra, Fidelity::Standard);
        assert!(k.len() < 2 * MAX_PARAM_LEN + 200);
    }
}
