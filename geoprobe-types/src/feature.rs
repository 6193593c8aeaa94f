use geo::{Geometry, Rect};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Property keys probed, in order, when looking for a human-readable label.
const NAME_KEYS: [&str; 5] = ["name", "NAME", "Name", "title", "label"];

/// Geometry of a decoded feature.
///
/// Decoding never fails a whole layer because of one bad feature: features
/// that cannot be converted are kept as `Malformed` and skipped at evaluation
/// time.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    Valid(Geometry<f64>),
    Malformed(String),
    Missing,
}

impl FeatureGeometry {
    pub fn as_valid(&self) -> Option<&Geometry<f64>> {
        match self {
            FeatureGeometry::Valid(geometry) => Some(geometry),
            _ => None,
        }
    }
}

/// A single feature of a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: Option<String>,
    pub geometry: FeatureGeometry,
    /// Bounding rectangle of a valid geometry, used to reject far features cheaply.
    pub bbox: Option<Rect<f64>>,
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: FeatureGeometry, properties: Map<String, Value>) -> Self {
        Self {
            id: None,
            geometry,
            bbox: None,
            properties,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_bbox(mut self, bbox: Option<Rect<f64>>) -> Self {
        self.bbox = bbox;
        self
    }

    /// Returns a property rendered as a string, if present and scalar.
    pub fn property_str(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Best-effort label for presentation: the first name-like property, then the id.
    pub fn display_name(&self) -> Option<String> {
        NAME_KEYS
            .iter()
            .find_map(|key| self.property_str(key))
            .or_else(|| self.id.clone())
    }
}

impl Serialize for Feature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let geometry = self
            .geometry
            .as_valid()
            .map(|g| geojson::Geometry::new(geojson::Value::from(g)));

        let mut state = serializer.serialize_struct("Feature", 4)?;
        state.serialize_field("type", "Feature")?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("geometry", &geometry)?;
        state.serialize_field("properties", &self.properties)?;
        state.end()
    }
}

/// A named, ordered sequence of features as loaded from one layer source.
#[derive(Debug, Clone, Default)]
pub struct FeatureCollection {
    pub name: Option<String>,
    pub features: Vec<Arc<Feature>>,
}

impl FeatureCollection {
    pub fn new(name: Option<String>, features: Vec<Arc<Feature>>) -> Self {
        Self { name, features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Number of features whose geometry could not be decoded.
    pub fn malformed_count(&self) -> usize {
        self.features
            .iter()
            .filter(|f| f.geometry.as_valid().is_none())
            .count()
    }
}
