//! Validation for query coordinates.

use crate::config::RegionBounds;
use crate::error::{ProbeError, Result};
use geo::Point;

/// Validates a longitude/latitude pair as WGS84 degrees.
///
/// Longitude: [-180.0, 180.0], Latitude: [-90.0, 90.0]
///
/// # Examples
///
/// ```
/// use geoprobe::compute::validation::validate_geographic_point;
///
/// assert!(validate_geographic_point(-95.37, 29.76).is_ok());
/// assert!(validate_geographic_point(200.0, 29.76).is_err());
/// assert!(validate_geographic_point(-95.37, f64::NAN).is_err());
/// ```
pub fn validate_geographic_point(lon: f64, lat: f64) -> Result<()> {
    if !lon.is_finite() {
        return Err(ProbeError::InvalidInput(format!(
            "Longitude must be finite, got: {}",
            lon
        )));
    }

    if !lat.is_finite() {
        return Err(ProbeError::InvalidInput(format!(
            "Latitude must be finite, got: {}",
            lat
        )));
    }

    if !(-180.0..=180.0).contains(&lon) {
        return Err(ProbeError::InvalidInput(format!(
            "Longitude out of range [-180.0, 180.0]: {}",
            lon
        )));
    }

    if !(-90.0..=90.0).contains(&lat) {
        return Err(ProbeError::InvalidInput(format!(
            "Latitude out of range [-90.0, 90.0]: {}",
            lat
        )));
    }

    Ok(())
}

/// Validates a clicked point and checks it lies inside the supported region.
///
/// Points outside the region are rejected, never clamped.
///
/// # Examples
///
/// ```
/// use geoprobe::compute::validation::validate_query_point;
/// use geoprobe::config::RegionBounds;
///
/// let texas = RegionBounds::default();
/// assert!(validate_query_point(-95.37, 29.76, &texas).is_ok());
/// assert!(validate_query_point(-74.00, 40.71, &texas).is_err());
/// ```
pub fn validate_query_point(lon: f64, lat: f64, region: &RegionBounds) -> Result<Point> {
    validate_geographic_point(lon, lat)?;

    if !region.contains(lon, lat) {
        log::warn!("Rejecting query point ({}, {}) outside region", lon, lat);
        return Err(ProbeError::OutOfRegion { lon, lat });
    }

    Ok(Point::new(lon, lat))
}
