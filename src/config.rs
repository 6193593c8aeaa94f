//! Engine configuration.
//!
//! Every field has a default so a partial JSON or TOML document is enough to
//! override a single knob.
use crate::error::{ProbeError, Result};
use serde::de::Error;
use std::time::Duration;

/// Rectangle that query points must fall inside, in degrees. Edges are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionBounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl RegionBounds {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// The whole WGS84 range.
    pub fn world() -> Self {
        Self::new(-180.0, -90.0, 180.0, 90.0)
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.min_lon..=self.max_lon).contains(&lon) && (self.min_lat..=self.max_lat).contains(&lat)
    }
}

impl Default for RegionBounds {
    /// Texas.
    fn default() -> Self {
        Self::new(-106.65, 25.84, -93.51, 36.50)
    }
}

/// Chunk sizes used by the evaluator, picked by layer feature count.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkingConfig {
    #[serde(default = "ChunkingConfig::default_chunk_size")]
    pub default_chunk_size: usize,

    #[serde(default = "ChunkingConfig::default_large_layer_threshold")]
    pub large_layer_threshold: usize,

    #[serde(default = "ChunkingConfig::default_large_chunk_size")]
    pub large_chunk_size: usize,

    #[serde(default = "ChunkingConfig::default_huge_layer_threshold")]
    pub huge_layer_threshold: usize,

    #[serde(default = "ChunkingConfig::default_huge_chunk_size")]
    pub huge_chunk_size: usize,
}

impl ChunkingConfig {
    const fn default_chunk_size() -> usize {
        500
    }

    const fn default_large_layer_threshold() -> usize {
        5_000
    }

    const fn default_large_chunk_size() -> usize {
        100
    }

    const fn default_huge_layer_threshold() -> usize {
        50_000
    }

    const fn default_huge_chunk_size() -> usize {
        25
    }

    /// Chunk size for a layer of `feature_count` features. Bigger layers get
    /// smaller chunks so they yield more often.
    pub fn chunk_size_for(&self, feature_count: usize) -> usize {
        if feature_count > self.huge_layer_threshold {
            self.huge_chunk_size
        } else if feature_count > self.large_layer_threshold {
            self.large_chunk_size
        } else {
            self.default_chunk_size
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.default_chunk_size == 0 || self.large_chunk_size == 0 || self.huge_chunk_size == 0
        {
            return Err("Chunk sizes must be greater than zero".to_string());
        }
        if self.huge_layer_threshold < self.large_layer_threshold {
            return Err("huge_layer_threshold must be >= large_layer_threshold".to_string());
        }
        Ok(())
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: Self::default_chunk_size(),
            large_layer_threshold: Self::default_large_layer_threshold(),
            large_chunk_size: Self::default_large_chunk_size(),
            huge_layer_threshold: Self::default_huge_layer_threshold(),
            huge_chunk_size: Self::default_huge_chunk_size(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub region: RegionBounds,

    /// Point and line features farther than this are ignored. Inclusive.
    #[serde(default = "EngineConfig::default_search_radius_km")]
    pub search_radius_km: f64,

    /// Maximum length of `nearest_points`.
    #[serde(default = "EngineConfig::default_nearest_limit")]
    pub nearest_limit: usize,

    /// Layers loaded and evaluated concurrently per batch.
    #[serde(default = "EngineConfig::default_max_concurrent_layers")]
    pub max_concurrent_layers: usize,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Wall-clock budget for scanning one layer.
    #[serde(default = "EngineConfig::default_layer_budget_ms")]
    pub layer_budget_ms: u64,

    #[serde(default = "EngineConfig::default_load_timeout_ms")]
    pub load_timeout_ms: u64,

    /// Wall-clock budget for a whole query. No limit when unset.
    #[serde(default)]
    pub query_budget_ms: Option<u64>,

    /// Layer ids known to be cheap, evaluated first in this order.
    #[serde(default)]
    pub priority_layers: Vec<String>,
}

impl EngineConfig {
    const fn default_search_radius_km() -> f64 {
        50.0
    }

    const fn default_nearest_limit() -> usize {
        10
    }

    const fn default_max_concurrent_layers() -> usize {
        3
    }

    const fn default_layer_budget_ms() -> u64 {
        5_000
    }

    const fn default_load_timeout_ms() -> u64 {
        30_000
    }

    pub fn with_region(mut self, region: RegionBounds) -> Self {
        self.region = region;
        self
    }

    pub fn with_search_radius_km(mut self, radius_km: f64) -> Self {
        assert!(
            radius_km.is_finite() && radius_km > 0.0,
            "Search radius must be positive and finite"
        );
        self.search_radius_km = radius_km;
        self
    }

    pub fn with_nearest_limit(mut self, limit: usize) -> Self {
        assert!(limit > 0, "Nearest limit must be greater than zero");
        self.nearest_limit = limit;
        self
    }

    pub fn with_max_concurrent_layers(mut self, concurrency: usize) -> Self {
        assert!(concurrency > 0, "Concurrency must be greater than zero");
        self.max_concurrent_layers = concurrency;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_layer_budget(mut self, budget: Duration) -> Self {
        self.layer_budget_ms = budget.as_millis() as u64;
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_query_budget(mut self, budget: Duration) -> Self {
        self.query_budget_ms = Some(budget.as_millis() as u64);
        self
    }

    pub fn with_priority_layers<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.priority_layers = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn layer_budget(&self) -> Duration {
        Duration::from_millis(self.layer_budget_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn query_budget(&self) -> Option<Duration> {
        self.query_budget_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let r = &self.region;
        if !(r.min_lon.is_finite()
            && r.min_lat.is_finite()
            && r.max_lon.is_finite()
            && r.max_lat.is_finite())
        {
            return Err("Region bounds must be finite".to_string());
        }
        if r.min_lon > r.max_lon || r.min_lat > r.max_lat {
            return Err("Region min corner must not exceed max corner".to_string());
        }
        if !self.search_radius_km.is_finite() || self.search_radius_km <= 0.0 {
            return Err("Search radius must be positive and finite".to_string());
        }
        if self.nearest_limit == 0 {
            return Err("Nearest limit must be greater than zero".to_string());
        }
        if self.max_concurrent_layers == 0 {
            return Err("Concurrency must be greater than zero".to_string());
        }
        if self.load_timeout_ms == 0 {
            return Err("Load timeout must be greater than zero".to_string());
        }
        self.chunking.validate()
    }

    /// Validates and converts the failure into the crate error type.
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(ProbeError::InvalidConfig)
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let config: EngineConfig = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> std::result::Result<Self, toml::de::Error> {
        let config: EngineConfig = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            region: RegionBounds::default(),
            search_radius_km: Self::default_search_radius_km(),
            nearest_limit: Self::default_nearest_limit(),
            max_concurrent_layers: Self::default_max_concurrent_layers(),
            chunking: ChunkingConfig::default(),
            layer_budget_ms: Self::default_layer_budget_ms(),
            load_timeout_ms: Self::default_load_timeout_ms(),
            query_budget_ms: None,
            priority_layers: Vec::new(),
        }
    }
}
