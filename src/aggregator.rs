//! Merging per-layer matches into a running query result.

use crate::evaluator::LayerMatches;
use geoprobe_types::result::{LayerTagged, PointMatch, QueryResult};
use std::collections::BTreeMap;

/// Keeps `nearest_points` sorted and capped while layers arrive in any order.
///
/// Truncating after every merge is exact: the nearest `limit` matches of a
/// union are always among the nearest `limit` of each part, so a point that
/// arrives late is never lost to an earlier truncation.
#[derive(Debug, Clone, Copy)]
pub struct ResultAggregator {
    nearest_limit: usize,
}

impl ResultAggregator {
    pub fn new(nearest_limit: usize) -> Self {
        Self {
            nearest_limit: nearest_limit.max(1),
        }
    }

    pub fn nearest_limit(&self) -> usize {
        self.nearest_limit
    }

    /// Folds one layer's matches into `into`.
    pub fn merge(&self, partial: LayerMatches, into: &mut QueryResult) {
        into.polygon_matches.extend(partial.polygons);
        for candidate in partial.proximity {
            self.insert_nearest(&mut into.nearest_points, candidate);
        }
    }

    fn insert_nearest(&self, nearest: &mut Vec<PointMatch>, candidate: PointMatch) {
        if !candidate.distance_km.is_finite() {
            return;
        }
        // Equal distances keep arrival order.
        let position = nearest.partition_point(|m| m.distance_km <= candidate.distance_km);
        if position >= self.nearest_limit {
            return;
        }
        nearest.insert(position, candidate);
        nearest.truncate(self.nearest_limit);
    }

    /// Re-establishes ordering and the cap. A no-op when every insertion went
    /// through [`ResultAggregator::merge`].
    pub fn finalize(&self, result: &mut QueryResult) {
        result
            .nearest_points
            .sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        result.nearest_points.truncate(self.nearest_limit);
    }
}

/// Groups matches by the display name of the layer that produced them.
pub fn group_by_layer<T: LayerTagged>(matches: &[T]) -> BTreeMap<String, Vec<&T>> {
    let mut groups: BTreeMap<String, Vec<&T>> = BTreeMap::new();
    for m in matches {
        groups.entry(m.layer_name().to_string()).or_default().push(m);
    }
    groups
}
