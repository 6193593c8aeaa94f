//! GeoJSON decoding for layer payloads.

use crate::error::{ProbeError, Result};
use geo::BoundingRect;
use geoprobe_types::feature::{Feature, FeatureCollection, FeatureGeometry};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Decodes a layer payload into a feature collection.
///
/// Only the top-level shape is mandatory: a JSON object with
/// `"type": "FeatureCollection"` and a `features` array. Individual features
/// that cannot be decoded are kept as malformed records so one bad feature
/// never costs the rest of the layer.
pub fn parse_feature_collection(layer_id: &str, payload: &[u8]) -> Result<FeatureCollection> {
    let invalid = |reason: String| ProbeError::InvalidFormat {
        layer_id: layer_id.to_string(),
        reason,
    };

    let value: Value =
        serde_json::from_slice(payload).map_err(|e| invalid(format!("not valid JSON: {}", e)))?;

    let Value::Object(mut document) = value else {
        return Err(invalid("top-level value is not an object".to_string()));
    };

    match document.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => {}
        Some(other) => {
            return Err(invalid(format!(
                "expected type FeatureCollection, found {}",
                other
            )));
        }
        None => return Err(invalid("missing \"type\" member".to_string())),
    }

    let Some(Value::Array(raw_features)) = document.remove("features") else {
        return Err(invalid("missing \"features\" array".to_string()));
    };

    let name = document
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string);

    let features: Vec<Arc<Feature>> = raw_features
        .into_iter()
        .map(|raw| Arc::new(decode_feature(raw)))
        .collect();

    let malformed = features
        .iter()
        .filter(|f| f.geometry.as_valid().is_none())
        .count();
    if malformed > 0 {
        log::debug!(
            "Layer {}: {} of {} features have no usable geometry",
            layer_id,
            malformed,
            features.len()
        );
    }

    Ok(FeatureCollection::new(name, features))
}

/// Decodes one feature object. Never fails; problems become `Malformed`.
pub fn decode_feature(raw: Value) -> Feature {
    let Value::Object(mut object) = raw else {
        return Feature::new(
            FeatureGeometry::Malformed("feature is not an object".to_string()),
            Map::new(),
        );
    };

    let properties = match object.remove("properties") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };

    let id = match object.get("id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    let geometry = match object.remove("geometry") {
        None | Some(Value::Null) => FeatureGeometry::Missing,
        Some(raw_geometry) => decode_geometry(raw_geometry),
    };

    let bbox = geometry.as_valid().and_then(|g| g.bounding_rect());

    let mut feature = Feature::new(geometry, properties).with_bbox(bbox);
    feature.id = id;
    feature
}

fn decode_geometry(raw: Value) -> FeatureGeometry {
    let parsed: ::geojson::Geometry = match serde_json::from_value(raw) {
        Ok(geometry) => geometry,
        Err(e) => return FeatureGeometry::Malformed(format!("invalid geometry: {}", e)),
    };

    match geo::Geometry::<f64>::try_from(parsed) {
        Ok(geometry) => FeatureGeometry::Valid(geometry),
        Err(e) => FeatureGeometry::Malformed(format!("unsupported geometry: {}", e)),
    }
}
