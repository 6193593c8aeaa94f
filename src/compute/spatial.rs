//! Geometric predicates used by the evaluator, built on the `geo` crate.

use geo::{Closest, ClosestPoint, Contains, Distance, Geometry, Haversine, Point, Rect};

/// Kilometres per degree of latitude, rounded down so that latitude-only
/// prefilters never reject a feature that is actually in range.
const KM_PER_DEGREE_LAT: f64 = 111.0;

/// Great-circle distance in kilometres.
pub fn haversine_km(a: &Point, b: &Point) -> f64 {
    Haversine.distance(*a, *b) / 1000.0
}

/// Radius rule shared by every proximity layer. The boundary is inclusive.
pub fn within_radius(distance_km: f64, radius_km: f64) -> bool {
    distance_km.is_finite() && distance_km <= radius_km
}

/// Inclusive bounding-box check.
pub fn point_in_bbox(bbox: &Rect, point: &Point) -> bool {
    let (min, max) = (bbox.min(), bbox.max());
    point.x() >= min.x && point.x() <= max.x && point.y() >= min.y && point.y() <= max.y
}

/// Containment test for polygonal geometry.
///
/// Points inside a hole are outside the polygon; points on a boundary are
/// outside. Returns `None` when the geometry is not polygonal.
pub fn polygon_contains(geometry: &Geometry, point: &Point) -> Option<bool> {
    match geometry {
        Geometry::Polygon(polygon) => Some(polygon.contains(point)),
        Geometry::MultiPolygon(multi) => Some(multi.contains(point)),
        Geometry::Rect(rect) => Some(rect.contains(point)),
        _ => None,
    }
}

/// Distance in kilometres from `point` to a point or line geometry.
///
/// Multi-geometries report their closest member. Lines are measured to the
/// closest point on the line in planar coordinates, then by great circle.
/// Returns `None` when the geometry is neither punctual nor linear.
pub fn proximity_km(geometry: &Geometry, point: &Point) -> Option<f64> {
    match geometry {
        Geometry::Point(p) => Some(haversine_km(point, p)),
        Geometry::MultiPoint(multi) => multi
            .iter()
            .map(|p| haversine_km(point, p))
            .min_by(f64::total_cmp),
        Geometry::LineString(line) => closest_km(line.closest_point(point), point),
        Geometry::Line(line) => closest_km(line.closest_point(point), point),
        Geometry::MultiLineString(multi) => closest_km(multi.closest_point(point), point),
        _ => None,
    }
}

fn closest_km(closest: Closest<f64>, point: &Point) -> Option<f64> {
    match closest {
        Closest::Intersection(p) | Closest::SinglePoint(p) => Some(haversine_km(point, &p)),
        Closest::Indeterminate => None,
    }
}

/// Cheap rejection for proximity scans: whether a feature's bounding box is
/// within `radius_km` of `point` in latitude alone.
///
/// Longitude is not checked because degree length varies with latitude.
pub fn may_be_within_radius(bbox: &Rect, point: &Point, radius_km: f64) -> bool {
    let margin = radius_km / KM_PER_DEGREE_LAT;
    point.y() >= bbox.min().y - margin && point.y() <= bbox.max().y + margin
}
