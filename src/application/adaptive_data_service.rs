// Adaptive data service - cache check, load, resolve, aggregate and sample per request
use crate::application::aggregator::aggregate;
use crate::application::cache_key::{CacheKeyDeriver, ExtraParams};
use crate::application::clock::Clock;
use crate::application::data_repository::{DataRepository, LoadError, LoadRequest};
use crate::application::fidelity_cache::{CacheOrigin, FidelityCache};
use crate::application::resolution_policy::{span_days, ResolutionPolicy};
use crate::application::sampling::Sampler;
use crate::domain::query::{DatasetKind, DepthFilter, InvalidTimeWindow, SiteSelection, TimeRange, TimeWindow};
use crate::domain::resolution::{AggregationMethod, Fidelity, PerformanceMode, ResolutionConfig};
use crate::domain::timeseries::Dataset;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Steps a request passes through, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPhase {
    Requested,
    KeyDerived,
    CacheHitExact,
    CacheHitMaxForStd,
    CacheMiss,
    Load,
    Resolve,
    Aggregate,
    Sample,
    CacheWrite,
    Responded,
}

/// Why a request could not be served
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request's own dates are unusable
    #[error(transparent)]
    Window(#[from] InvalidTimeWindow),
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// One logical data request, already parsed from the query string
#[derive(Debug, Clone, PartialEq)]
pub struct DataQuery {
    pub kind: DatasetKind,
    pub sites: SiteSelection,
    pub time_range: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub performance_mode: PerformanceMode,
    pub fidelity: Fidelity,
    /// Value columns to load; empty means all
    pub parameters: Vec<String>,
    pub resolution: Option<AggregationMethod>,
    pub downsample: bool,
    pub max_points: Option<usize>,
    pub depth: DepthFilter,
}

impl DataQuery {
    pub fn new(kind: DatasetKind, sites: SiteSelection, time_range: impl Into<String>) -> Self {
        Self {
            kind,
            sites,
            time_range: time_range.into(),
            start_date: None,
            end_date: None,
            performance_mode: PerformanceMode::default(),
            fidelity: Fidelity::default(),
            parameters: Vec::new(),
            resolution: None,
            downsample: true,
            max_points: None,
            depth: DepthFilter::default(),
        }
    }

    /// Maximum mode always asks for maximum fidelity
    pub fn effective_fidelity(&self) -> Fidelity {
        if self.performance_mode == PerformanceMode::Maximum {
            Fidelity::Maximum
        } else {
            self.fidelity
        }
    }

    /// Maximum fidelity is always served raw
    pub fn effective_mode(&self) -> PerformanceMode {
        match self.effective_fidelity() {
            Fidelity::Maximum => PerformanceMode::Maximum,
            Fidelity::Standard => self.performance_mode,
        }
    }

    fn cache_params(&self) -> ExtraParams {
        let mut params = ExtraParams::new().with("performance_mode", self.effective_mode().as_str());

        if let Some(start) = &self.start_date {
            params.insert("start_date", start.as_str());
        }
        if let Some(end) = &self.end_date {
            params.insert("end_date", end.as_str());
        }
        if !self.parameters.is_empty() {
            params.insert("parameters", self.parameters.join(","));
        }
        if let Some(method) = self.resolution {
            params.insert("resolution", method.as_str());
        }
        if !self.downsample {
            params.insert("downsample", "false");
        }
        if let Some(points) = self.max_points {
            params.insert("max_points", points.to_string());
        }
        if let Some(min) = self.depth.min {
            params.insert("depth_min", min.to_string());
        }
        if let Some(max) = self.depth.max {
            params.insert("depth_max", max.to_string());
        }
        params
    }
}

/// Describes how a result was produced; cached alongside the rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub aggregation_method: AggregationMethod,
    pub performance_tier: PerformanceMode,
    pub target_points: usize,
    pub time_range_days: f64,
    /// Rows in the reduced result, before pagination
    pub total_records: usize,
    /// Rows the warehouse returned
    pub loaded_records: usize,
    pub extrema_skipped: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedPayload {
    dataset: Dataset,
    metadata: ResultMetadata,
}

#[derive(Debug, Clone)]
pub struct DataResponse {
    pub dataset: Dataset,
    pub metadata: ResultMetadata,
    /// `None` when the result was loaded fresh
    pub cache_origin: Option<CacheOrigin>,
    pub cache_key: String,
    pub phases: Vec<RequestPhase>,
    pub processing_ms: u64,
    /// Explains a result too small for analysis
    pub notice: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Below this many rows the response carries an insufficient-data notice
    pub min_rows: usize,
    /// Row cap for a single warehouse load, also the maximum-mode point budget
    pub max_rows: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_rows: 2,
            max_rows: 1_000_000,
        }
    }
}

#[derive(Clone)]
pub struct AdaptiveDataService {
    repository: Arc<dyn DataRepository>,
    cache: FidelityCache,
    keys: CacheKeyDeriver,
    policy: ResolutionPolicy,
    sampler: Sampler,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
}

impl AdaptiveDataService {
    pub fn new(
        repository: Arc<dyn DataRepository>,
        cache: FidelityCache,
        policy: ResolutionPolicy,
        sampler: Sampler,
        clock: Arc<dyn Clock>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            repository,
            cache,
            keys: CacheKeyDeriver::new(clock.clone()),
            policy,
            sampler,
            clock,
            settings,
        }
    }

    pub fn cache(&self) -> &FidelityCache {
        &self.cache
    }

    pub async fn fetch(&self, query: &DataQuery) -> Result<DataResponse, FetchError> {
        let started = Instant::now();
        let mut phases = vec![RequestPhase::Requested];
        let endpoint = query.kind.endpoint();

        let window = TimeRange::parse(&query.time_range).resolve(
            query.start_date.as_deref(),
            query.end_date.as_deref(),
            self.clock.now(),
        )?;

        let key = self.keys.derive_key(
            endpoint,
            &query.sites,
            &query.time_range,
            &query.cache_params(),
            query.effective_fidelity(),
        );
        phases.push(RequestPhase::KeyDerived);

        let mut cached = None;
        if let Some(hit) = self.cache.lookup(&key).await {
            match serde_json::from_slice::<CachedPayload>(&hit.payload) {
                Ok(payload) => cached = Some((payload, hit.origin)),
                Err(e) => {
                    tracing::warn!(cache_key = %key, "Discarding unreadable cache entry: {}", e);
                }
            }
        }

        let (dataset, metadata, cache_origin) = match cached {
            Some((payload, CacheOrigin::Exact)) => {
                phases.push(RequestPhase::CacheHitExact);
                (payload.dataset, payload.metadata, Some(CacheOrigin::Exact))
            }
            Some((payload, CacheOrigin::MaxForStd)) => {
                phases.push(RequestPhase::CacheHitMaxForStd);
                // Raw rows from the maximum entry still need this request's reduction
                let (dataset, mut metadata) = self.reduce(&payload.dataset, &window, query, &mut phases);
                metadata.loaded_records = payload.metadata.loaded_records;
                (dataset, metadata, Some(CacheOrigin::MaxForStd))
            }
            None => {
                phases.push(RequestPhase::CacheMiss);
                let loaded = self.load(query, &window).await?;
                phases.push(RequestPhase::Load);

                let (dataset, metadata) = self.reduce(&loaded, &window, query, &mut phases);
                let payload = CachedPayload { dataset, metadata };
                match serde_json::to_vec(&payload) {
                    Ok(bytes) => {
                        self.cache.store(&key, Bytes::from(bytes)).await;
                        phases.push(RequestPhase::CacheWrite);
                    }
                    Err(e) => tracing::warn!(cache_key = %key, "Skipping cache write: {}", e),
                }
                (payload.dataset, payload.metadata, None)
            }
        };

        let notice = dataset
            .require_rows("trend analysis", self.settings.min_rows)
            .err()
            .map(|e| e.to_string());

        phases.push(RequestPhase::Responded);
        let processing_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            endpoint,
            cache = cache_origin.map(|o| o.as_str()).unwrap_or("miss"),
            rows = dataset.len(),
            method = metadata.aggregation_method.as_str(),
            processing_ms,
            "Served data request"
        );

        Ok(DataResponse {
            dataset,
            metadata,
            cache_origin,
            cache_key: key.to_string(),
            phases,
            processing_ms,
            notice,
        })
    }

    async fn load(&self, query: &DataQuery, window: &TimeWindow) -> Result<Dataset, LoadError> {
        let request = LoadRequest {
            kind: query.kind,
            site_codes: query.sites.codes().to_vec(),
            start: window.start,
            end: window.end,
            value_columns: query.parameters.clone(),
            depth_filter: (!query.depth.is_empty()).then_some(query.depth),
            limit: Some(self.settings.max_rows),
            offset: None,
            dedupe: true,
        };

        match self.repository.load(&request).await {
            Ok(dataset) => {
                tracing::debug!(rows = dataset.len(), endpoint = query.kind.endpoint(), "Loaded dataset");
                Ok(dataset)
            }
            Err(e) => {
                tracing::error!(endpoint = query.kind.endpoint(), "Data load failed: {}", e);
                Err(e)
            }
        }
    }

    /// Pick a resolution for the window, then aggregate and sample
    fn reduce(
        &self,
        loaded: &Dataset,
        window: &TimeWindow,
        query: &DataQuery,
        phases: &mut Vec<RequestPhase>,
    ) -> (Dataset, ResultMetadata) {
        // Open-ended windows start at the first loaded row
        let start = window
            .start
            .or_else(|| loaded.time_span().map(|(first, _)| first))
            .unwrap_or(window.end);

        let mode = query.effective_mode();
        let config = self.apply_overrides(
            self.policy.get_optimal_resolution(start, window.end, mode),
            query,
        );
        phases.push(RequestPhase::Resolve);

        let aggregated = aggregate(loaded, &config, query.kind.aggregation_groups());
        phases.push(RequestPhase::Aggregate);

        let (dataset, extrema_skipped) = if config.downsample {
            let outcome = self.sampler.downsample(
                &aggregated,
                config.target_points,
                Some(query.kind.sampling_group()),
                &aggregated.value_columns,
            );
            phases.push(RequestPhase::Sample);
            (outcome.dataset, outcome.extrema_skipped)
        } else {
            (aggregated, false)
        };

        let metadata = ResultMetadata {
            aggregation_method: config.aggregation_method,
            performance_tier: config.performance_tier,
            target_points: config.target_points,
            time_range_days: span_days(start, window.end),
            total_records: dataset.len(),
            loaded_records: loaded.len(),
            extrema_skipped,
        };

        (dataset, metadata)
    }

    /// Explicit resolution, point budget and downsample switches win over the
    /// policy, except in maximum mode which stays raw and unsampled
    fn apply_overrides(&self, mut config: ResolutionConfig, query: &DataQuery) -> ResolutionConfig {
        if config.performance_tier == PerformanceMode::Maximum {
            return config;
        }
        if let Some(method) = query.resolution {
            config.aggregation_method = method;
        }
        if let Some(points) = query.max_points.filter(|&p| p > 0) {
            config.target_points = points.min(self.settings.max_rows);
        }
        if !query.downsample {
            config.downsample = false;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::cache_store::CacheStore;
    use crate::application::clock::FixedClock;
    use crate::application::resolution_policy::TierTables;
    use crate::application::sampling::ScanPeakFinder;
    use crate::domain::timeseries::TimeSeriesRow;
    use crate::infrastructure::memory_cache::MemoryCacheStore;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeRepository {
        dataset: Dataset,
        calls: AtomicUsize,
    }

    impl FakeRepository {
        fn new(dataset: Dataset) -> Arc<Self> {
            Arc::new(Self {
                dataset,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DataRepository for FakeRepository {
        async fn load(&self, _request: &LoadRequest) -> Result<Dataset, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.dataset.clone())
        }
    }

    struct TimedOutRepository;

    #[async_trait]
    impl DataRepository for TimedOutRepository {
        async fn load(&self, _request: &LoadRequest) -> Result<Dataset, LoadError> {
            Err(LoadError::Timeout(Duration::from_secs(30)))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn service(repository: Arc<dyn DataRepository>, store: Arc<MemoryCacheStore>) -> AdaptiveDataService {
        AdaptiveDataService::new(
            repository,
            FidelityCache::new(store, Duration::from_secs(600)),
            ResolutionPolicy::new(TierTables::default(), 1_000_000),
            Sampler::new(Arc::new(ScanPeakFinder), 10),
            Arc::new(FixedClock(now())),
            PipelineSettings::default(),
        )
    }

    /// Five-minute readings for two sites over the last two days
    fn water_quality() -> Dataset {
        let start = now() - TimeDelta::days(2);
        let mut rows = Vec::new();
        for i in 0..576 {
            let ts = start + TimeDelta::minutes(5 * i);
            for site in ["S1", "S2"] {
                rows.push(TimeSeriesRow::new(ts, site, None, vec![Some(20.0 + (i % 12) as f64)]));
            }
        }
        Dataset::new(vec!["temp_c".to_string()], rows)
    }

    fn query() -> DataQuery {
        DataQuery::new(DatasetKind::WaterQuality, SiteSelection::from_list(["S1", "S2"]), "7d")
    }

    #[tokio::test]
    async fn test_miss_then_exact_hit() {
        let repo = FakeRepository::new(water_quality());
        let service = service(repo.clone(), Arc::new(MemoryCacheStore::new(16)));

        let first = service.fetch(&query()).await.unwrap();
        assert_eq!(first.cache_origin, None);
        assert_eq!(
            first.phases,
            vec![
                RequestPhase::Requested,
                RequestPhase::KeyDerived,
                RequestPhase::CacheMiss,
                RequestPhase::Load,
                RequestPhase::Resolve,
                RequestPhase::Aggregate,
                RequestPhase::Sample,
                RequestPhase::CacheWrite,
                RequestPhase::Responded,
            ]
        );
        assert_eq!(first.metadata.aggregation_method, AggregationMethod::FifteenMinute);
        assert_eq!(first.metadata.loaded_records, 1_152);

        let second = service.fetch(&query()).await.unwrap();
        assert_eq!(second.cache_origin, Some(CacheOrigin::Exact));
        assert_eq!(
            second.phases,
            vec![
                RequestPhase::Requested,
                RequestPhase::KeyDerived,
                RequestPhase::CacheHitExact,
                RequestPhase::Responded,
            ]
        );
        assert_eq!(second.dataset, first.dataset);
        assert_eq!(second.cache_key, first.cache_key);
        assert_eq!(repo.calls(), 1);
    }

    #[tokio::test]
    async fn test_maximum_entry_serves_standard_request() {
        let repo = FakeRepository::new(water_quality());
        let store = Arc::new(MemoryCacheStore::new(16));
        let service = service(repo.clone(), store.clone());

        let mut raw = query();
        raw.fidelity = Fidelity::Maximum;
        let full = service.fetch(&raw).await.unwrap();
        assert_eq!(full.metadata.aggregation_method, AggregationMethod::Raw);
        assert_eq!(full.dataset.len(), 1_152);
        assert!(full.cache_key.ends_with(":max"));

        let mut fast = query();
        fast.performance_mode = PerformanceMode::Fast;
        let reduced = service.fetch(&fast).await.unwrap();

        assert_eq!(reduced.cache_origin, Some(CacheOrigin::MaxForStd));
        assert_eq!(reduced.metadata.aggregation_method, AggregationMethod::Hourly);
        assert!(reduced.dataset.len() < full.dataset.len());
        assert!(!reduced.phases.contains(&RequestPhase::CacheWrite));
        assert_eq!(repo.calls(), 1);
        assert_eq!(store.stats().await.entries, 1);
    }

    #[tokio::test]
    async fn test_maximum_mode_is_raw_and_unsampled() {
        let repo = FakeRepository::new(water_quality());
        let service = service(repo, Arc::new(MemoryCacheStore::new(16)));

        let mut max = query();
        max.performance_mode = PerformanceMode::Maximum;
        max.max_points = Some(10);
        max.resolution = Some(AggregationMethod::Daily);

        let response = service.fetch(&max).await.unwrap();
        assert_eq!(response.metadata.performance_tier, PerformanceMode::Maximum);
        assert_eq!(response.metadata.target_points, 1_000_000);
        assert_eq!(response.dataset.len(), 1_152);
        assert!(!response.phases.contains(&RequestPhase::Sample));
    }

    #[tokio::test]
    async fn test_overrides_apply_to_standard_requests() {
        let repo = FakeRepository::new(water_quality());
        let service = service(repo, Arc::new(MemoryCacheStore::new(16)));

        let mut custom = query();
        custom.resolution = Some(AggregationMethod::Raw);
        custom.max_points = Some(100);

        let response = service.fetch(&custom).await.unwrap();
        assert_eq!(response.metadata.aggregation_method, AggregationMethod::Raw);
        assert_eq!(response.metadata.target_points, 100);
        assert!(response.dataset.len() <= 100);
        assert_eq!(response.metadata.total_records, response.dataset.len());
    }

    #[tokio::test]
    async fn test_load_failure_propagates_and_caches_nothing() {
        let store = Arc::new(MemoryCacheStore::new(16));
        let service = service(Arc::new(TimedOutRepository), store.clone());

        let err = service.fetch(&query()).await.unwrap_err();
        assert!(matches!(err, FetchError::Load(LoadError::Timeout(_))));
        assert_eq!(store.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_bad_dates_are_window_errors() {
        let service = service(FakeRepository::new(water_quality()), Arc::new(MemoryCacheStore::new(16)));

        let mut custom = query();
        custom.time_range = "custom".to_string();
        custom.start_date = Some("last tuesday".to_string());

        assert!(matches!(
            service.fetch(&custom).await,
            Err(FetchError::Window(InvalidTimeWindow::BadDate(_)))
        ));
    }

    #[tokio::test]
    async fn test_small_result_carries_notice() {
        let single = Dataset::new(
            vec!["temp_c".to_string()],
            vec![TimeSeriesRow::new(now(), "S1", None, vec![Some(21.0)])],
        );
        let service = service(FakeRepository::new(single), Arc::new(MemoryCacheStore::new(16)));

        let response = service.fetch(&query()).await.unwrap();
        assert_eq!(response.dataset.len(), 1);
        assert!(response.notice.unwrap().contains("at least 2 rows"));
    }

    #[tokio::test]
    async fn test_unreadable_cache_entry_is_a_miss() {
        let repo = FakeRepository::new(water_quality());
        let store = Arc::new(MemoryCacheStore::new(16));
        let service = service(repo.clone(), store.clone());

        let q = query();
        let key = CacheKeyDeriver::new(Arc::new(FixedClock(now()))).derive_key(
            q.kind.endpoint(),
            &q.sites,
            &q.time_range,
            &q.cache_params(),
            q.effective_fidelity(),
        );
        FidelityCache::new(store, Duration::from_secs(60))
            .store(&key, Bytes::from_static(b"not json"))
            .await;

        let response = service.fetch(&q).await.unwrap();
        assert_eq!(response.cache_origin, None);
        assert_eq!(repo.calls(), 1);
    }

    #[tokio::test]
    async fn test_redox_end_to_end_reduction() {
        let start = Utc.with_ymd_and_hms(2024, 6, 13, 0, 0, 0).unwrap();
        let depths = [10.0, 20.0, 30.0, 50.0, 100.0];
        let rows: Vec<TimeSeriesRow> = (0..100_000i64)
            .map(|i| {
                let series = (i % 10) as usize;
                let site = if series < 5 { "S1" } else { "S2" };
                let depth = depths[series % 5];
                let value = 200.0 * ((i as f64) / 500.0).sin() - depth;
                TimeSeriesRow::new(start + TimeDelta::seconds(2 * i), site, Some(depth), vec![Some(value)])
            })
            .collect();
        let input = Dataset::new(vec!["eh_mv".to_string()], rows);
        let first_ts = input.rows[0].timestamp;
        let last_ts = input.rows[input.len() - 1].timestamp;

        let service = service(FakeRepository::new(input), Arc::new(MemoryCacheStore::new(16)));
        let mut q = DataQuery::new(DatasetKind::Redox, SiteSelection::from_list(["S1", "S2"]), "custom");
        q.start_date = Some("2024-06-13".to_string());
        q.end_date = Some("2024-06-15".to_string());
        q.performance_mode = PerformanceMode::Balanced;
        q.max_points = Some(5_000);

        let response = service.fetch(&q).await.unwrap();
        let out = &response.dataset;

        assert_eq!(response.metadata.aggregation_method, AggregationMethod::Raw);
        assert!(out.len() <= 5_000);
        assert_eq!(out.rows[0].timestamp, first_ts);
        assert_eq!(out.rows[out.len() - 1].timestamp, last_ts);

        let sites: HashSet<&str> = out.rows.iter().map(|r| r.site_code.as_str()).collect();
        assert_eq!(sites.len(), 2);
        let depths_seen: HashSet<i64> = out
            .rows
            .iter()
            .filter_map(|r| r.depth_cm.map(|d| d as i64))
            .collect();
        assert_eq!(depths_seen.len(), 5);
        assert!(out.is_sorted_by_time());
    }
}
