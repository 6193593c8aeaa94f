use crate::feature::Feature;
use crate::layer::GeometryKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A validated query location in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryPoint {
    pub lon: f64,
    pub lat: f64,
}

impl QueryPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn to_geo(self) -> geo::Point<f64> {
        geo::Point::new(self.lon, self.lat)
    }
}

/// Anything that can be traced back to the layer that produced it.
pub trait LayerTagged {
    fn layer_id(&self) -> &str;
    fn layer_name(&self) -> &str;
}

/// A polygon feature containing the query point.
#[derive(Debug, Clone, Serialize)]
pub struct PolygonMatch {
    pub feature: Arc<Feature>,
    pub layer_id: String,
    pub layer_name: String,
}

/// A point or line feature within the search radius of the query point.
#[derive(Debug, Clone, Serialize)]
pub struct PointMatch {
    pub feature: Arc<Feature>,
    pub layer_id: String,
    pub layer_name: String,
    pub geometry_kind: GeometryKind,
    pub distance_km: f64,
}

impl LayerTagged for PolygonMatch {
    fn layer_id(&self) -> &str {
        &self.layer_id
    }

    fn layer_name(&self) -> &str {
        &self.layer_name
    }
}

impl LayerTagged for PointMatch {
    fn layer_id(&self) -> &str {
        &self.layer_id
    }

    fn layer_name(&self) -> &str {
        &self.layer_name
    }
}

/// Category of a per-layer failure recorded in a query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerErrorKind {
    FetchFailed,
    InvalidFormat,
    Evaluation,
    /// The whole-query budget ran out before this layer was scheduled.
    QueryBudgetExceeded,
}

/// A failure local to one layer. Never aborts the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerError {
    pub layer_id: String,
    pub layer_name: String,
    pub kind: LayerErrorKind,
    pub message: String,
}

/// Where a layer's features came from for a given query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOrigin {
    Cached,
    Fetched,
    /// Waited on a fetch started by another caller.
    Coalesced,
}

/// How far a layer scan got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Complete,
    /// The per-layer budget ran out; matches found so far were kept.
    Partial,
    Failed,
}

/// Per-layer bookkeeping for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDiagnostics {
    pub layer_id: String,
    pub status: ScanStatus,
    pub origin: Option<LoadOrigin>,
    pub feature_count: usize,
    pub scanned: usize,
    pub malformed: usize,
    pub load_ms: u64,
    pub eval_ms: u64,
}

/// Lifecycle of a query.
///
/// ```text
/// Pending -> Loading -> Evaluating -> Loading -> ... -> Complete
///    \          \            \
///     +----------+------------+--> Cancelled | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Pending,
    Loading,
    Evaluating,
    Complete,
    Cancelled,
    Failed,
}

impl QueryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryState::Complete | QueryState::Cancelled | QueryState::Failed
        )
    }

    pub fn can_transition_to(&self, next: QueryState) -> bool {
        use QueryState::*;
        match (self, next) {
            (Pending, Loading) => true,
            (Loading, Evaluating) => true,
            (Evaluating, Loading) => true,
            (Pending | Evaluating, Complete) => true,
            (Pending | Loading | Evaluating, Cancelled | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QueryState::Pending => "pending",
            QueryState::Loading => "loading",
            QueryState::Evaluating => "evaluating",
            QueryState::Complete => "complete",
            QueryState::Cancelled => "cancelled",
            QueryState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Lightweight progress notification, cheap to emit on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryProgress {
    pub query_id: u64,
    pub state: QueryState,
    pub processed_layers: usize,
    pub total_layers: usize,
    pub error_count: usize,
}

/// Accumulated outcome of one query.
///
/// Mutated incrementally while the query runs; frozen once the query settles.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub query_id: u64,
    pub point: QueryPoint,
    pub state: QueryState,
    pub polygon_matches: Vec<PolygonMatch>,
    /// Sorted by ascending distance and capped at the configured limit.
    pub nearest_points: Vec<PointMatch>,
    pub processed_layer_count: usize,
    pub total_layer_count: usize,
    pub errors: Vec<LayerError>,
    pub diagnostics: Vec<LayerDiagnostics>,
    pub is_complete: bool,
    pub elapsed_ms: u64,
}

impl QueryResult {
    pub fn new(query_id: u64, point: QueryPoint, total_layer_count: usize) -> Self {
        Self {
            query_id,
            point,
            state: QueryState::Pending,
            polygon_matches: Vec::new(),
            nearest_points: Vec::new(),
            processed_layer_count: 0,
            total_layer_count,
            errors: Vec::new(),
            diagnostics: Vec::new(),
            is_complete: false,
            elapsed_ms: 0,
        }
    }

    pub fn progress(&self) -> QueryProgress {
        QueryProgress {
            query_id: self.query_id,
            state: self.state,
            processed_layers: self.processed_layer_count,
            total_layers: self.total_layer_count,
            error_count: self.errors.len(),
        }
    }

    /// Layers whose scan stopped early on the per-layer budget.
    pub fn partial_layers(&self) -> impl Iterator<Item = &str> {
        self.diagnostics
            .iter()
            .filter(|d| d.status == ScanStatus::Partial)
            .map(|d| d.layer_id.as_str())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
