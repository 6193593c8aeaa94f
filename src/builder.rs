//! Engine builder
//!
//! Assembles a catalog, a layer source and configuration into a
//! [`QueryOrchestrator`].

use crate::cache::LayerCache;
use crate::catalog::LayerCatalog;
use crate::config::EngineConfig;
use crate::error::{ProbeError, Result};
use crate::orchestrator::QueryOrchestrator;
use crate::source::{DirectorySource, LayerSource};
use std::path::PathBuf;
use std::sync::Arc;

/// Builder for a query engine.
pub struct EngineBuilder {
    catalog: Option<LayerCatalog>,
    source: Option<Arc<dyn LayerSource>>,
    cache: Option<Arc<LayerCache>>,
    config: EngineConfig,
}

impl EngineBuilder {
    /// Create a builder with the default configuration and an empty catalog.
    pub fn new() -> Self {
        Self {
            catalog: None,
            source: None,
            cache: None,
            config: EngineConfig::default(),
        }
    }

    pub fn catalog(mut self, catalog: LayerCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Fetch layers through `source`.
    pub fn source<S: LayerSource + 'static>(mut self, source: S) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn shared_source(mut self, source: Arc<dyn LayerSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Read layer locators as paths relative to `root`.
    pub fn layer_directory<P: Into<PathBuf>>(self, root: P) -> Self {
        self.source(DirectorySource::new(root))
    }

    /// Reuse an existing cache instead of creating one. Its source wins over
    /// any source set on the builder.
    pub fn shared_cache(mut self, cache: Arc<LayerCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the engine configuration (radius, concurrency, budgets, etc.).
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the orchestrator. Fails on invalid configuration or when no
    /// source was given.
    pub fn build(self) -> Result<QueryOrchestrator> {
        self.config.check()?;

        let cache = match (self.cache, self.source) {
            (Some(cache), _) => cache,
            (None, Some(source)) => Arc::new(LayerCache::new(
                source,
                self.config.chunking.large_layer_threshold,
            )),
            (None, None) => {
                return Err(ProbeError::InvalidConfig(
                    "a layer source is required".to_string(),
                ));
            }
        };

        let catalog = self.catalog.unwrap_or_default();
        log::debug!(
            "Building engine with {} layers, radius {} km",
            catalog.len(),
            self.config.search_radius_km
        );
        QueryOrchestrator::new(Arc::new(catalog), cache, self.config)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
