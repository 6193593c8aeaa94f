//! Compute layer: decoding, predicates and input validation.
//!
//! This module holds the pure, synchronous pieces the evaluator and loader
//! are built from:
//! - GeoJSON payload decoding into `geo` geometry
//! - Containment and great-circle proximity predicates
//! - Query point validation
//!
//! Nothing here touches the cache, the scheduler or the network.

pub mod geojson;
pub mod spatial;
pub mod validation;
