//! Point-click spatial queries over many GeoJSON layers.
//!
//! A click becomes a query: every polygon containing the point and the
//! nearest point or line features within a search radius, gathered across a
//! catalog of independently loaded layers. Layers load lazily, are cached for
//! the life of the process and are scanned in small chunks that yield to the
//! executor, so a single-threaded host stays responsive.
//!
//! ```rust
//! use geoprobe::prelude::*;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let counties = r#"{"type":"FeatureCollection","features":[{"type":"Feature",
//!     "properties":{"NAME":"Harris"},"geometry":{"type":"Polygon",
//!     "coordinates":[[[-95.9,29.5],[-94.9,29.5],[-94.9,30.2],[-95.9,30.2],[-95.9,29.5]]]}}]}"#;
//!
//! let engine = EngineBuilder::new()
//!     .catalog(LayerCatalog::new(vec![LayerDescriptor::new(
//!         "counties",
//!         "Counties",
//!         GeometryKind::Polygon,
//!         "counties.geojson",
//!     )])?)
//!     .source(MemorySource::new().with_document("counties.geojson", counties))
//!     .build()?;
//!
//! let result = engine.submit_query(-95.37, 29.76, &NoopListener).await?;
//! assert!(result.is_complete);
//! assert_eq!(result.polygon_matches.len(), 1);
//! # Ok::<(), geoprobe::ProbeError>(())
//! # }).unwrap();
//! ```

pub mod aggregator;
pub mod builder;
pub mod cache;
pub mod catalog;
pub mod compute;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod orchestrator;
pub mod source;

pub use aggregator::{ResultAggregator, group_by_layer};
pub use builder::EngineBuilder;
pub use cache::{CacheStats, LayerCache, LayerCacheEntry, LoadedLayer, PrefetchReport};
pub use catalog::LayerCatalog;
pub use config::{ChunkingConfig, EngineConfig, RegionBounds};
pub use error::{ProbeError, Result};
pub use evaluator::{ChunkedEvaluator, LayerMatches, ScanSummary};
pub use orchestrator::{NoopListener, QueryListener, QueryOrchestrator, QueryRequest};
pub use source::{DirectorySource, FetchError, LayerSource, MemorySource};

#[cfg(feature = "http")]
pub use source::HttpSource;

pub use geo::Point;

pub use geoprobe_types::feature::{Feature, FeatureCollection, FeatureGeometry};
pub use geoprobe_types::layer::{GeometryKind, LayerDescriptor, LayerStyle};
pub use geoprobe_types::result::{
    LayerDiagnostics, LayerError, LayerErrorKind, LoadOrigin, PointMatch, PolygonMatch,
    QueryPoint, QueryProgress, QueryResult, QueryState, ScanStatus,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{EngineBuilder, ProbeError, QueryOrchestrator, Result};

    pub use crate::{EngineConfig, LayerCatalog, RegionBounds};

    pub use crate::{DirectorySource, LayerSource, MemorySource};

    pub use crate::{NoopListener, QueryListener};

    pub use crate::{
        GeometryKind, LayerDescriptor, PointMatch, PolygonMatch, QueryProgress, QueryResult,
        QueryState,
    };

    pub use std::time::Duration;
}
