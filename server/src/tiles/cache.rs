//! Byte-weighted LRU cache for encoded pyramid tiles
//!
//! Entries leave the cache through size-based eviction, time-to-idle or an
//! experiment invalidation issued when the layer service sees a republished
//! pyramid.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use metrics::{counter, gauge};
use moka::future::Cache;

/// Key for tile cache entries
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TileKey {
    pub experiment_id: String,
    pub layer: String,
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone)]
pub struct TileCacheConfig {
    /// Maximum cache size in bytes
    pub max_size_bytes: u64,
    pub ttl: Duration,
    pub tti: Duration,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 256 * 1024 * 1024,
            ttl: Duration::from_secs(3600),
            tti: Duration::from_secs(1800),
        }
    }
}

impl TileCacheConfig {
    pub fn with_max_mb(max_mb: u64) -> Self {
        Self {
            max_size_bytes: max_mb * 1024 * 1024,
            ..Self::default()
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct TileCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
    /// Total size in bytes (approximate until pending tasks run)
    pub weighted_size: u64,
}

/// Thread-safe tile cache keyed by (experiment, layer, z, x, y)
pub struct TileCache {
    cache: Cache<TileKey, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TileCache {
    pub fn new(config: TileCacheConfig) -> Self {
        let cache = Cache::builder()
            .weigher(|_key: &TileKey, value: &Bytes| -> u32 { value.len().min(u32::MAX as usize) as u32 })
            .max_capacity(config.max_size_bytes)
            .time_to_live(config.ttl)
            .time_to_idle(config.tti)
            // Invalidation by experiment uses invalidate_entries_if
            .support_invalidation_closures()
            .build();

        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(TileCacheConfig::default())
    }

    pub async fn get(&self, key: &TileKey) -> Option<Bytes> {
        let result = self.cache.get(key).await;

        if result.is_some() {
            let hits = self.hits.fetch_add(1, Ordering::Relaxed) + 1;
            counter!("cellmap_tile_cache_hits_total").increment(1);
            if hits % 100 == 0 {
                self.update_gauges();
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!("cellmap_tile_cache_misses_total").increment(1);
        }

        result
    }

    pub async fn insert(&self, key: TileKey, value: Bytes) {
        let size = value.len();
        self.cache.insert(key, value).await;
        counter!("cellmap_tile_cache_bytes_inserted_total").increment(size as u64);
    }

    /// Get a tile, loading and caching it on a miss
    ///
    /// Failed loads are not cached, so a tile that appears later on disk is
    /// picked up by the next request.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: TileKey, init: F) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Bytes, E>>,
    {
        if let Some(cached) = self.get(&key).await {
            return Ok(cached);
        }

        let value = init().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }

    /// Hit rate in [0, 1]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 { 0.0 } else { hits as f64 / total as f64 }
    }

    pub fn stats(&self) -> TileCacheStats {
        TileCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.cache.entry_count(),
            weighted_size: self.cache.weighted_size(),
        }
    }

    /// Drop all tiles of an experiment, e.g. after its pyramids were rebuilt
    pub fn invalidate_experiment(&self, experiment_id: &str) {
        let id = experiment_id.to_string();
        if let Err(e) = self.cache.invalidate_entries_if(move |key, _| key.experiment_id == id) {
            tracing::warn!("Tile cache invalidation failed for {}: {}", experiment_id, e);
        } else {
            tracing::debug!("Invalidated cached tiles of experiment: {}", experiment_id);
        }
    }

    fn update_gauges(&self) {
        gauge!("cellmap_tile_cache_hit_rate").set(self.hit_rate());
        gauge!("cellmap_tile_cache_entry_count").set(self.cache.entry_count() as f64);
        gauge!("cellmap_tile_cache_size_bytes").set(self.cache.weighted_size() as f64);
    }
}
