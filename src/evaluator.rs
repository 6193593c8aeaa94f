//! Cooperative per-layer evaluation.
//!
//! A layer is scanned linearly in chunks. After every chunk the evaluator
//! yields to the executor so other layers, other queries and the host's own
//! tasks keep running, checks its wall-clock budget and checks for
//! cancellation. Big layers get smaller chunks and therefore yield more often.

use crate::cache::LayerCacheEntry;
use crate::compute::spatial::{
    may_be_within_radius, point_in_bbox, polygon_contains, proximity_km, within_radius,
};
use crate::config::{ChunkingConfig, EngineConfig};
use crate::error::{ProbeError, Result};
use geo::{Geometry, Point};
use geoprobe_types::feature::{Feature, FeatureGeometry};
use geoprobe_types::layer::GeometryKind;
use geoprobe_types::result::{PointMatch, PolygonMatch, ScanStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How far a scan got and what it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSummary {
    pub total: usize,
    pub scanned: usize,
    pub malformed: usize,
    pub chunk_size: usize,
    pub elapsed: Duration,
    /// The per-layer budget ran out before every feature was scanned.
    pub timed_out: bool,
}

/// Matches produced by one layer for one query point.
#[derive(Debug, Clone)]
pub struct LayerMatches {
    pub layer_id: String,
    pub layer_name: String,
    pub geometry_kind: GeometryKind,
    pub polygons: Vec<PolygonMatch>,
    /// Point and line matches, unordered.
    pub proximity: Vec<PointMatch>,
    pub summary: ScanSummary,
}

impl LayerMatches {
    fn empty(entry: &LayerCacheEntry, chunk_size: usize) -> Self {
        Self {
            layer_id: entry.layer_id.clone(),
            layer_name: entry.layer_name.clone(),
            geometry_kind: entry.geometry_kind,
            polygons: Vec::new(),
            proximity: Vec::new(),
            summary: ScanSummary {
                total: entry.feature_count,
                scanned: 0,
                malformed: 0,
                chunk_size,
                elapsed: Duration::ZERO,
                timed_out: false,
            },
        }
    }

    pub fn status(&self) -> ScanStatus {
        if self.summary.timed_out {
            ScanStatus::Partial
        } else {
            ScanStatus::Complete
        }
    }

    pub fn match_count(&self) -> usize {
        self.polygons.len() + self.proximity.len()
    }
}

enum Hit {
    Contained,
    Within(f64),
}

/// Runs the predicate matching a layer's geometry kind over its features.
#[derive(Debug, Clone)]
pub struct ChunkedEvaluator {
    search_radius_km: f64,
    chunking: ChunkingConfig,
    layer_budget: Duration,
}

impl ChunkedEvaluator {
    pub fn new(search_radius_km: f64, chunking: ChunkingConfig, layer_budget: Duration) -> Self {
        Self {
            search_radius_km,
            chunking,
            layer_budget,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.search_radius_km,
            config.chunking.clone(),
            config.layer_budget(),
        )
    }

    pub fn search_radius_km(&self) -> f64 {
        self.search_radius_km
    }

    /// Evaluates every feature of `entry` against `point`.
    ///
    /// Returns `Err(ProbeError::Cancelled)` as soon as the token is observed
    /// cancelled; matches found so far are discarded. Running out of budget is
    /// not an error: the scan stops and the partial matches are returned with
    /// `summary.timed_out` set.
    pub async fn evaluate(
        &self,
        entry: &LayerCacheEntry,
        point: &Point,
        token: &CancellationToken,
    ) -> Result<LayerMatches> {
        let started = Instant::now();
        let chunk_size = self.chunking.chunk_size_for(entry.feature_count);
        let mut matches = LayerMatches::empty(entry, chunk_size);

        let mut chunks = entry.collection.features.chunks(chunk_size).peekable();
        while let Some(chunk) = chunks.next() {
            if token.is_cancelled() {
                log::debug!(
                    "Evaluation of {} cancelled after {} features",
                    entry.layer_id,
                    matches.summary.scanned
                );
                return Err(ProbeError::Cancelled);
            }

            for feature in chunk {
                match self.evaluate_feature(entry.geometry_kind, feature, point) {
                    Ok(Some(hit)) => push_hit(&mut matches, feature, hit),
                    Ok(None) => {}
                    Err(e) => {
                        matches.summary.malformed += 1;
                        log::debug!("Skipping feature in layer {}: {}", entry.layer_id, e);
                    }
                }
            }
            matches.summary.scanned += chunk.len();

            if chunks.peek().is_none() {
                break;
            }

            if started.elapsed() >= self.layer_budget {
                matches.summary.timed_out = true;
                log::warn!(
                    "{}; keeping {} matches from {} of {} features",
                    ProbeError::LayerTimeout {
                        layer_id: entry.layer_id.clone(),
                        budget_ms: self.layer_budget.as_millis() as u64,
                    },
                    matches.match_count(),
                    matches.summary.scanned,
                    matches.summary.total
                );
                break;
            }

            tokio::task::yield_now().await;
        }

        if matches.summary.malformed > 0 {
            log::warn!(
                "Layer {}: skipped {} malformed features",
                entry.layer_id,
                matches.summary.malformed
            );
        }

        matches.summary.elapsed = started.elapsed();
        Ok(matches)
    }

    fn evaluate_feature(
        &self,
        kind: GeometryKind,
        feature: &Feature,
        point: &Point,
    ) -> Result<Option<Hit>> {
        let geometry = match &feature.geometry {
            FeatureGeometry::Valid(geometry) => geometry,
            FeatureGeometry::Malformed(reason) => {
                return Err(ProbeError::FeatureMalformed(reason.clone()));
            }
            FeatureGeometry::Missing => {
                return Err(ProbeError::FeatureMalformed("no geometry".to_string()));
            }
        };

        if !accepts(kind, geometry) {
            return Err(ProbeError::FeatureMalformed(format!(
                "unexpected geometry in {} layer",
                kind
            )));
        }

        match kind {
            GeometryKind::Polygon => {
                if let Some(bbox) = &feature.bbox
                    && !point_in_bbox(bbox, point)
                {
                    return Ok(None);
                }
                Ok(polygon_contains(geometry, point)
                    .filter(|inside| *inside)
                    .map(|_| Hit::Contained))
            }
            GeometryKind::Point | GeometryKind::Line => {
                if let Some(bbox) = &feature.bbox
                    && !may_be_within_radius(bbox, point, self.search_radius_km)
                {
                    return Ok(None);
                }
                let distance_km = proximity_km(geometry, point).ok_or_else(|| {
                    ProbeError::FeatureMalformed("degenerate geometry".to_string())
                })?;
                Ok(within_radius(distance_km, self.search_radius_km)
                    .then_some(Hit::Within(distance_km)))
            }
        }
    }
}

fn accepts(kind: GeometryKind, geometry: &Geometry) -> bool {
    match kind {
        GeometryKind::Polygon => matches!(
            geometry,
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) | Geometry::Rect(_)
        ),
        GeometryKind::Point => matches!(geometry, Geometry::Point(_) | Geometry::MultiPoint(_)),
        GeometryKind::Line => matches!(
            geometry,
            Geometry::LineString(_) | Geometry::MultiLineString(_) | Geometry::Line(_)
        ),
    }
}

fn push_hit(matches: &mut LayerMatches, feature: &Arc<Feature>, hit: Hit) {
    match hit {
        Hit::Contained => matches.polygons.push(PolygonMatch {
            feature: Arc::clone(feature),
            layer_id: matches.layer_id.clone(),
            layer_name: matches.layer_name.clone(),
        }),
        Hit::Within(distance_km) => matches.proximity.push(PointMatch {
            feature: Arc::clone(feature),
            layer_id: matches.layer_id.clone(),
            layer_name: matches.layer_name.clone(),
            geometry_kind: matches.geometry_kind,
            distance_km,
        }),
    }
}
