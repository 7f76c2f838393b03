use crate::application::resolution_policy::TierTables;
use crate::application::sampling::{ExtremaStrategy, DEFAULT_MIN_NON_NULL, DEFAULT_ROLLING_ROW_LIMIT};
use serde::Deserialize;

/// Service configuration. Every field has a default so the service starts
/// without a config file.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerSettings,
    pub warehouse: WarehouseSettings,
    pub cache: CacheSettings,
    pub sampling: SamplingSettings,
    pub resolution: TierTables,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WarehouseSettings {
    /// Statement executor URL, e.g. `http://warehouse:8000/api/statements`
    pub endpoint: String,
    pub token: String,
    pub timeout_secs: u64,
    pub max_rows: usize,
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/api/statements".to_string(),
            token: String::new(),
            timeout_secs: 30,
            max_rows: 1_000_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 1_800,
            max_entries: 512,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SamplingSettings {
    pub extrema_strategy: ExtremaStrategy,
    pub rolling_row_limit: usize,
    pub min_non_null: usize,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            extrema_strategy: ExtremaStrategy::default(),
            rolling_row_limit: DEFAULT_ROLLING_ROW_LIMIT,
            min_non_null: DEFAULT_MIN_NON_NULL,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub min_rows: usize,
    /// Rows per chunk on stream routes when the request does not say
    pub default_chunk_size: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_rows: 2,
            default_chunk_size: None,
        }
    }
}

/// `config/service.toml` if present, then `ENVMON__SECTION__KEY` variables
pub fn load_service_config() -> anyhow::Result<ServiceConfig> {
    load_from("config/service")
}

fn load_from(file: &str) -> anyhow::Result<ServiceConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(file).required(false))
        .add_source(
            config::Environment::with_prefix("ENVMON")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resolution::AggregationMethod;

    #[test]
    fn test_defaults_without_file() {
        let config = load_from("config/does-not-exist").unwrap();
        assert_eq!(config.cache.ttl_secs, 1_800);
        assert_eq!(config.warehouse.max_rows, 1_000_000);
        assert_eq!(config.sampling.extrema_strategy, ExtremaStrategy::Scan);
        assert_eq!(config.resolution, TierTables::default());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [cache]
                ttl_secs = 60

                [sampling]
                extrema_strategy = "rolling"

                [[resolution.fast]]
                max_days = 2.0
                method = "mean-hourly"
                target_points = 800

                [[resolution.fast]]
                method = "mean-daily"
                target_points = 500
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: ServiceConfig = settings.try_deserialize().unwrap();

        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.max_entries, 512);
        assert_eq!(config.sampling.extrema_strategy, ExtremaStrategy::Rolling);
        assert_eq!(config.resolution.fast.len(), 2);
        assert_eq!(config.resolution.fast[0].method, AggregationMethod::Hourly);
        assert_eq!(config.resolution.fast[1].max_days, None);
        assert_eq!(config.resolution.balanced, TierTables::default().balanced);
        assert_eq!(config.server.bind, "0.0.0.0:8080");
    }
}
