// Cache store trait - opaque key/value service with TTLs
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid cache key pattern '{0}'")]
    Pattern(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Returns whether the value was stored
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<bool, CacheError>;

    /// Remove every key matching a glob (`*`, `?`); returns how many went
    async fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError>;

    async fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}
