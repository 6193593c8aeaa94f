//! Error types for geoprobe.

use thiserror::Error;

/// Errors raised by the engine.
///
/// Per-layer variants (`FetchFailed`, `InvalidFormat`, `LayerTimeout`) are
/// recorded on the query result by the orchestrator and never abort a query.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProbeError {
    #[error("layer not found: {0}")]
    LayerNotFound(String),

    #[error("duplicate layer id in catalog: {0}")]
    DuplicateLayer(String),

    #[error("failed to fetch layer '{layer_id}': {reason}")]
    FetchFailed { layer_id: String, reason: String },

    #[error("layer '{layer_id}' is not a valid feature collection: {reason}")]
    InvalidFormat { layer_id: String, reason: String },

    #[error("malformed feature: {0}")]
    FeatureMalformed(String),

    #[error("layer '{layer_id}' exceeded its {budget_ms} ms budget")]
    LayerTimeout { layer_id: String, budget_ms: u64 },

    #[error("operation was cancelled")]
    Cancelled,

    #[error("point ({lon}, {lat}) is outside the supported region")]
    OutOfRegion { lon: f64, lat: f64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown or already settled query: {0}")]
    UnknownQuery(u64),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        ProbeError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;
