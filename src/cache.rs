//! TTL + LRU response and intent caches sitting in front of LLM calls
//! (spec §4.7/§4.8).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    last_accessed_at: Instant,
    access_count: u64,
}

/// Point-in-time counters for a cache (spec §4.7).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Generic TTL + LRU cache keyed by `String`. `maxSize` default 1000, TTL
/// default 60 minutes, matching the response/intent cache defaults.
pub struct TtlLruCache<V: Clone> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    max_size: usize,
    ttl: Duration,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
    evictions: std::sync::atomic::AtomicU64,
}

impl<V: Clone + Send + Sync> TtlLruCache<V> {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_size,
            ttl,
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
            evictions: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_accessed_at = now;
                entry.access_count += 1;
                self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put(&self, key: String, value: V) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            if let Some(lru_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&lru_key);
                self.evictions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + self.ttl,
                last_accessed_at: now,
                access_count: 0,
            },
        );
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.read().await.len(),
            hits: self.hits.load(std::sync::atomic::Ordering::Relaxed),
            misses: self.misses.load(std::sync::atomic::Ordering::Relaxed),
            evictions: self.evictions.load(std::sync::atomic::Ordering::Relaxed),
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// Derive a response-cache key from the inputs that determine an LLM
/// completion: the normalized prompt, model, temperature and max tokens.
pub fn response_cache_key(normalized_prompt: &str, model: &str, temperature: f32, max_tokens: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_prompt.as_bytes());
    hasher.update(b"\0");
    hasher.update(model.as_bytes());
    hasher.update(b"\0");
    hasher.update(temperature.to_be_bytes());
    hasher.update(max_tokens.to_be_bytes());
    format!("{:x}", hasher.finalize())
}

/// A cached routing decision (spec §4.8).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedIntent {
    pub intent: String,
    pub target_agent: String,
    pub confidence: f32,
    pub parameters: serde_json::Value,
    pub reasoning: String,
}

pub type ResponseCache = TtlLruCache<String>;
pub type IntentCache = TtlLruCache<CachedIntent>;

pub const DEFAULT_MAX_SIZE: usize = 1000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
