// In-memory cache store with per-entry TTLs and glob invalidation
use crate::application::cache_store::{CacheError, CacheStats, CacheStore};
use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Upper bound on how long an entry may live
const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

struct Entry {
    payload: Bytes,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Shared by every request. Writes to one key are last-writer-wins.
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, Entry>>,
    max_entries: usize,
}

impl MemoryCacheStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(Instant::now()))
            .map(|entry| entry.payload.clone()))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        entries.retain(|_, entry| entry.is_live(now));

        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            // Evict whatever would expire first
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                tracing::debug!(cache_key = %oldest, "cache_evicted");
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                payload: value,
                expires_at: now + ttl.min(MAX_TTL),
            },
        );
        Ok(true)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let matcher = glob_to_regex(pattern)?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !matcher.is_match(key));
        Ok(before - entries.len())
    }

    async fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.entries.read().await;
        CacheStats {
            entries: entries.values().filter(|e| e.is_live(now)).count(),
            ..CacheStats::default()
        }
    }
}

/// `*` matches any run of characters, `?` exactly one; everything else is literal
fn glob_to_regex(pattern: &str) -> Result<Regex, CacheError> {
    let mut expr = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');

    Regex::new(&expr).map_err(|_| CacheError::Pattern(pattern.to_string()))
}
