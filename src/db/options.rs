use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::metrics::{default_metrics, EngineMetrics};
use crate::types::Result;

/// References retained per query execution before caching is disabled.
pub const DEFAULT_MAX_CACHED_REFERENCES: usize = 100_000;
/// Unsubscribed query results kept (LRU) for pure caching.
pub const DEFAULT_IDLE_QUERY_CACHE_CAPACITY: usize = 64;
/// Records materialized per page of a lazy relationship collection.
pub const DEFAULT_LAZY_PAGE_SIZE: usize = 32;
/// Stripes in the relationship entry-lock table.
pub const DEFAULT_LOCK_STRIPES: usize = 256;
/// Storage shards per relationship map.
pub const DEFAULT_MAP_SHARDS: usize = 16;

/// Configuration supplied when opening a [`super::Db`].
#[derive(Clone)]
pub struct DbOptions {
    /// Cap on references retained by a collector for the live-query cache.
    pub max_cached_references: usize,
    /// Capacity of the LRU holding query results without listeners.
    pub idle_query_cache_capacity: usize,
    /// Page size of lazy relationship collections.
    pub lazy_page_size: usize,
    /// Number of relationship entry-lock stripes.
    pub lock_stripes: usize,
    /// Number of storage shards per relationship map.
    pub map_shards: usize,
    /// Whether the built-in memory store scans partitions with rayon.
    pub parallel_scan: bool,
    /// Optional metrics sink.
    pub metrics: Option<Arc<dyn EngineMetrics>>,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            max_cached_references: DEFAULT_MAX_CACHED_REFERENCES,
            idle_query_cache_capacity: DEFAULT_IDLE_QUERY_CACHE_CAPACITY,
            lazy_page_size: DEFAULT_LAZY_PAGE_SIZE,
            lock_stripes: DEFAULT_LOCK_STRIPES,
            map_shards: DEFAULT_MAP_SHARDS,
            parallel_scan: false,
            metrics: None,
        }
    }
}

impl fmt::Debug for DbOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbOptions")
            .field("max_cached_references", &self.max_cached_references)
            .field("idle_query_cache_capacity", &self.idle_query_cache_capacity)
            .field("lazy_page_size", &self.lazy_page_size)
            .field("lock_stripes", &self.lock_stripes)
            .field("map_shards", &self.map_shards)
            .field("parallel_scan", &self.parallel_scan)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl DbOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-execution reference retention cap.
    pub fn max_cached_references(mut self, limit: usize) -> Self {
        self.max_cached_references = limit;
        self
    }

    /// Sets the idle query-cache capacity.
    pub fn idle_query_cache_capacity(mut self, capacity: usize) -> Self {
        self.idle_query_cache_capacity = capacity;
        self
    }

    /// Sets the lazy collection page size.
    pub fn lazy_page_size(mut self, size: usize) -> Self {
        self.lazy_page_size = size;
        self
    }

    /// Sets the number of entry-lock stripes.
    pub fn lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes;
        self
    }

    /// Sets the number of shards per relationship map.
    pub fn map_shards(mut self, shards: usize) -> Self {
        self.map_shards = shards;
        self
    }

    /// Enables or disables parallel scans of the memory store.
    pub fn parallel_scan(mut self, enabled: bool) -> Self {
        self.parallel_scan = enabled;
        self
    }

    /// Sets the metrics sink.
    pub fn metrics(mut self, metrics: Arc<dyn EngineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Metrics sink, falling back to the no-op implementation.
    pub fn metrics_sink(&self) -> Arc<dyn EngineMetrics> {
        self.metrics.clone().unwrap_or_else(default_metrics)
    }
}

/// File form of [`DbOptions`]; absent keys keep their defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    /// See [`DbOptions::max_cached_references`].
    pub max_cached_references: Option<usize>,
    /// See [`DbOptions::idle_query_cache_capacity`].
    pub idle_query_cache_capacity: Option<usize>,
    /// See [`DbOptions::lazy_page_size`].
    pub lazy_page_size: Option<usize>,
    /// See [`DbOptions::lock_stripes`].
    pub lock_stripes: Option<usize>,
    /// See [`DbOptions::map_shards`].
    pub map_shards: Option<usize>,
    /// See [`DbOptions::parallel_scan`].
    pub parallel_scan: Option<bool>,
}

impl DbConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Applies the configured values on top of `base`.
    pub fn apply(&self, mut base: DbOptions) -> DbOptions {
        if let Some(limit) = self.max_cached_references {
            base.max_cached_references = limit;
        }
        if let Some(capacity) = self.idle_query_cache_capacity {
            base.idle_query_cache_capacity = capacity;
        }
        if let Some(size) = self.lazy_page_size {
            base.lazy_page_size = size;
        }
        if let Some(stripes) = self.lock_stripes {
            base.lock_stripes = stripes;
        }
        if let Some(shards) = self.map_shards {
            base.map_shards = shards;
        }
        if let Some(parallel) = self.parallel_scan {
            base.parallel_scan = parallel;
        }
        base
    }
}
