//! # geoprobe-types
//!
//! Shared data types for the geoprobe spatial query engine.
//!
//! - **Layer types**: `LayerDescriptor`, `GeometryKind`, `LayerStyle`
//! - **Feature types**: `Feature`, `FeatureGeometry`, `FeatureCollection`
//! - **Result types**: `QueryResult`, `PolygonMatch`, `PointMatch`, `LayerError`,
//!   `LayerDiagnostics`, `QueryState`, `QueryProgress`
//!
//! All result types are serializable with Serde so snapshots can be handed
//! straight to a UI or across a process boundary as JSON. Geometry is built
//! on the `geo` crate.
//!
//! ## Examples
//!
//! ```rust
//! use geoprobe_types::layer::{GeometryKind, LayerDescriptor};
//!
//! let counties = LayerDescriptor::new("counties", "Counties", GeometryKind::Polygon, "counties.geojson")
//!     .as_default();
//! assert!(counties.is_default);
//! assert!(!counties.skip);
//! ```

pub mod feature;
pub mod layer;
pub mod result;
