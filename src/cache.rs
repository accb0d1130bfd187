//! Search Cache
//!
//! TTL cache for web search results with SHA256 keys, so repeated research
//! for the same topic does not hit the search API twice.

use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::web::SearchResult;

/// Cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
}

/// Search result cache
#[derive(Clone)]
pub struct SearchCache {
    cache: Cache<String, Arc<Vec<SearchResult>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl SearchCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self {
            cache,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Key = SHA256(normalized query + result limit)
    pub fn compute_key(query: &str, max_results: usize) -> String {
        let mut hasher = Sha256::new();
        let normalized = query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        hasher.update(normalized.as_bytes());
        hasher.update(max_results.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Vec<SearchResult>>> {
        if let Some(results) = self.cache.get(key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Search cache HIT: {}", key.get(..16).unwrap_or(key));
            Some(results)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("Search cache MISS: {}", key.get(..16).unwrap_or(key));
            None
        }
    }

    pub async fn set(&self, key: &str, results: Vec<SearchResult>) {
        self.cache.insert(key.to_string(), Arc::new(results)).await;
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            entries: self.cache.entry_count(),
            hits,
            misses,
            hit_rate_percent: if total > 0 {
                (hits as f64 / total as f64) * 100.0
            } else {
                0.0
            },
        }
    }
}
