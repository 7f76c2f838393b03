// Fidelity-aware cache - a maximum-fidelity entry also answers standard requests
use crate::application::cache_key::CacheKey;
use crate::application::cache_store::{CacheError, CacheStats, CacheStore};
use crate::domain::resolution::Fidelity;
use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOrigin {
    Exact,
    /// Standard request served from the maximum-fidelity entry
    MaxForStd,
}

impl CacheOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOrigin::Exact => "exact",
            CacheOrigin::MaxForStd => "max_for_std",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheHit {
    pub payload: Bytes,
    pub origin: CacheOrigin,
}

/// One count per logical lookup, however many keys it probed
#[derive(Default)]
struct LookupCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Clone)]
pub struct FidelityCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    counters: Arc<LookupCounters>,
}

impl FidelityCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            counters: Arc::default(),
        }
    }

    /// Standard requests probe the maximum-fidelity key first, then their own.
    /// Maximum requests only ever accept their own key. Never writes.
    pub async fn lookup(&self, key: &CacheKey) -> Option<CacheHit> {
        let hit = self.probe_fidelities(key).await;
        let counter = if hit.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    async fn probe_fidelities(&self, key: &CacheKey) -> Option<CacheHit> {
        if key.fidelity() == Fidelity::Standard {
            if let Some(payload) = self.probe(&key.as_maximum()).await {
                return Some(CacheHit {
                    payload,
                    origin: CacheOrigin::MaxForStd,
                });
            }
        }

        self.probe(key).await.map(|payload| CacheHit {
            payload,
            origin: CacheOrigin::Exact,
        })
    }

    /// Store under exactly `key`. Failures are logged, never raised.
    pub async fn store(&self, key: &CacheKey, payload: Bytes) -> bool {
        let key = key.to_string();
        let size = payload.len();
        match self.store.set(&key, payload, self.ttl).await {
            Ok(stored) => {
                tracing::debug!(cache_key = %key, size_bytes = size, stored, "cache_stored");
                stored
            }
            Err(e) => {
                tracing::warn!(cache_key = %key, "Cache write failed: {}", e);
                false
            }
        }
    }

    pub async fn invalidate(&self, pattern: &str) -> Result<usize, CacheError> {
        let deleted = self.store.delete_pattern(pattern).await?;
        tracing::info!(pattern, deleted, "cache_invalidated");
        Ok(deleted)
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            ..self.store.stats().await
        }
    }

    async fn probe(&self, key: &CacheKey) -> Option<Bytes> {
        let key = key.to_string();
        match self.store.get(&key).await {
            Ok(Some(payload)) => {
                tracing::debug!(cache_key = %key, "cache_hit");
                Some(payload)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(cache_key = %key, "Cache read failed, treating as miss: {}", e);
                None
            }
        }
    }
}
