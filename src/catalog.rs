//! Static registry of queryable layers.

use crate::error::{ProbeError, Result};
use geoprobe_types::layer::{GeometryKind, LayerDescriptor};
use rustc_hash::FxHashMap;
use serde::Deserialize;

/// Read-only set of layer descriptors, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct LayerCatalog {
    layers: Vec<LayerDescriptor>,
    index: FxHashMap<String, usize>,
}

/// On-disk shape of a catalog document.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDocument {
    layers: Vec<LayerDescriptor>,
}

impl LayerCatalog {
    /// Builds a catalog. Layer ids must be unique.
    pub fn new(layers: Vec<LayerDescriptor>) -> Result<Self> {
        let mut index = FxHashMap::default();
        for (position, layer) in layers.iter().enumerate() {
            if layer.id.is_empty() {
                return Err(ProbeError::InvalidInput(format!(
                    "Layer at index {} has an empty id",
                    position
                )));
            }
            if index.insert(layer.id.clone(), position).is_some() {
                return Err(ProbeError::DuplicateLayer(layer.id.clone()));
            }
        }

        let skipped = layers.iter().filter(|l| l.skip).count();
        if skipped > 0 {
            log::info!(
                "Catalog has {} layers, {} administratively skipped",
                layers.len(),
                skipped
            );
        }

        Ok(Self { layers, index })
    }

    /// Parses a `{"layers": [...]}` document.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: CatalogDocument = serde_json::from_str(json)?;
        Self::new(document.layers)
    }

    /// Parses a TOML document with a `[[layers]]` array.
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let document: CatalogDocument = toml::from_str(toml_str)
            .map_err(|e| ProbeError::Serialization(format!("Failed to parse catalog: {}", e)))?;
        Self::new(document.layers)
    }

    pub fn list(&self) -> &[LayerDescriptor] {
        &self.layers
    }

    pub fn get(&self, id: &str) -> Result<&LayerDescriptor> {
        self.index
            .get(id)
            .map(|&position| &self.layers[position])
            .ok_or_else(|| ProbeError::LayerNotFound(id.to_string()))
    }

    /// Position of a layer in declaration order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn by_geometry_kind(&self, kind: GeometryKind) -> Vec<&LayerDescriptor> {
        self.layers
            .iter()
            .filter(|l| l.geometry_kind == kind)
            .collect()
    }

    /// Layers that may be loaded and evaluated.
    pub fn active(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.layers.iter().filter(|l| !l.skip)
    }

    /// Active layers flagged for prefetching.
    pub fn defaults(&self) -> impl Iterator<Item = &LayerDescriptor> {
        self.active().filter(|l| l.is_default)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LayerCatalog {
        LayerCatalog::new(vec![
            LayerDescriptor::new("counties", "Counties", GeometryKind::Polygon, "counties.geojson")
                .as_default(),
            LayerDescriptor::new("cities", "Cities", GeometryKind::Point, "cities.geojson"),
            LayerDescriptor::new("parcels", "Parcels", GeometryKind::Polygon, "parcels.geojson")
                .skipped(),
            LayerDescriptor::new("rivers", "Rivers", GeometryKind::Line, "rivers.geojson"),
        ])
        .unwrap()
    }

    #[test]
    fn test_get_and_not_found() {
        let catalog = sample();
        assert_eq!(catalog.get("cities").unwrap().name, "Cities");
        assert_eq!(
            catalog.get("nope").unwrap_err(),
            ProbeError::LayerNotFound("nope".to_string())
        );
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = LayerCatalog::new(vec![
            LayerDescriptor::new("a", "A", GeometryKind::Point, "a"),
            LayerDescriptor::new("a", "A again", GeometryKind::Point, "a2"),
        ]);
        assert_eq!(result.unwrap_err(), ProbeError::DuplicateLayer("a".into()));
    }

    #[test]
    fn test_by_geometry_kind_keeps_order() {
        let catalog = sample();
        let polygons: Vec<_> = catalog
            .by_geometry_kind(GeometryKind::Polygon)
            .into_iter()
            .map(|l| l.id.as_str())
            .collect();
        assert_eq!(polygons, vec!["counties", "parcels"]);
    }

    #[test]
    fn test_active_and_defaults_exclude_skipped() {
        let catalog = sample();
        let active: Vec<_> = catalog.active().map(|l| l.id.as_str()).collect();
        assert_eq!(active, vec!["counties", "cities", "rivers"]);

        let defaults: Vec<_> = catalog.defaults().map(|l| l.id.as_str()).collect();
        assert_eq!(defaults, vec!["counties"]);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "layers": [
                {"id": "wells", "name": "Wells", "geometry_kind": "point", "source": "wells.json"},
                {"id": "aquifers", "name": "Aquifers", "geometry_kind": "polygon",
                 "source": "aquifers.json", "skip": true}
            ]
        }"#;
        let catalog = LayerCatalog::from_json(json).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("aquifers").unwrap().skip);
        assert_eq!(catalog.position("aquifers"), Some(1));
    }
}
