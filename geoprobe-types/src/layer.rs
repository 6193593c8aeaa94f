use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of geometry a layer holds, which selects the predicate used to
/// evaluate its features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    /// Areas tested for containment of the query point.
    Polygon,
    /// Locations ranked by distance from the query point.
    Point,
    /// Linear features ranked by distance to their closest point.
    Line,
}

impl GeometryKind {
    /// Whether features of this kind produce distance-ranked matches.
    pub fn is_proximity(&self) -> bool {
        matches!(self, GeometryKind::Point | GeometryKind::Line)
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryKind::Polygon => write!(f, "polygon"),
            GeometryKind::Point => write!(f, "point"),
            GeometryKind::Line => write!(f, "line"),
        }
    }
}

/// Display hints carried through to the presentation layer untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerStyle {
    #[serde(default = "LayerStyle::default_color")]
    pub color: String,

    #[serde(default = "LayerStyle::default_fill_opacity")]
    pub fill_opacity: f32,

    /// Marker radius in pixels for point layers.
    #[serde(default = "LayerStyle::default_radius")]
    pub radius: f32,
}

impl LayerStyle {
    fn default_color() -> String {
        "#3388ff".to_string()
    }

    const fn default_fill_opacity() -> f32 {
        0.2
    }

    const fn default_radius() -> f32 {
        6.0
    }
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            color: Self::default_color(),
            fill_opacity: Self::default_fill_opacity(),
            radius: Self::default_radius(),
        }
    }
}

/// Static description of one queryable layer.
///
/// Descriptors are defined once when the catalog is built and never change
/// afterwards. A descriptor flagged `skip` is never loaded or evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerDescriptor {
    pub id: String,
    pub name: String,
    pub geometry_kind: GeometryKind,
    /// Opaque key handed to the layer source when fetching.
    pub source: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub style: LayerStyle,
}

impl LayerDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        geometry_kind: GeometryKind,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            geometry_kind,
            source: source.into(),
            is_default: false,
            skip: false,
            style: LayerStyle::default(),
        }
    }

    /// Marks the layer for prefetching at startup.
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Administratively disables the layer.
    pub fn skipped(mut self) -> Self {
        self.skip = true;
        self
    }

    pub fn with_style(mut self, style: LayerStyle) -> Self {
        self.style = style;
        self
    }
}
