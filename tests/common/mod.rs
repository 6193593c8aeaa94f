//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use geoprobe::{FetchError, LayerSource, QueryListener, QueryProgress, QueryResult, QueryState};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// In-memory source that counts fetches per locator and can delay or fail.
/// It reports no size hints unless told to stall them.
#[derive(Default)]
pub struct CountingSource {
    documents: Mutex<FxHashMap<String, Bytes>>,
    calls: Mutex<FxHashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Duration>,
    stalled_hints: AtomicBool,
    hint_calls: AtomicUsize,
}

impl CountingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, locator: &str, body: String) -> Self {
        self.documents.lock().insert(locator.to_string(), Bytes::from(body));
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock() = delay;
        self
    }

    pub fn failing(self, locator: &str) -> Self {
        self.failing.lock().insert(locator.to_string());
        self
    }

    /// Size hint requests never answer.
    pub fn stall_size_hints(self) -> Self {
        self.stalled_hints.store(true, Ordering::SeqCst);
        self
    }

    pub fn hint_calls(&self) -> usize {
        self.hint_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self, locator: &str) -> usize {
        self.calls.lock().get(locator).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

#[async_trait]
impl LayerSource for CountingSource {
    async fn fetch(&self, locator: &str) -> Result<Bytes, FetchError> {
        *self.calls.lock().entry(locator.to_string()).or_default() += 1;

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().contains(locator) {
            return Err(FetchError::Transport {
                locator: locator.to_string(),
                message: "503 Service Unavailable".to_string(),
            });
        }

        self.documents
            .lock()
            .get(locator)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(locator.to_string()))
    }

    async fn size_hint(&self, _locator: &str) -> Option<u64> {
        self.hint_calls.fetch_add(1, Ordering::SeqCst);
        if self.stalled_hints.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        None
    }
}

/// Records every callback it receives.
#[derive(Default)]
pub struct RecordingListener {
    pub progress: Mutex<Vec<QueryProgress>>,
    pub partials: Mutex<Vec<QueryResult>>,
}

impl RecordingListener {
    pub fn states(&self) -> Vec<QueryState> {
        self.progress.lock().iter().map(|p| p.state).collect()
    }

    pub fn partial_count(&self) -> usize {
        self.partials.lock().len()
    }
}

impl QueryListener for RecordingListener {
    fn on_progress(&self, progress: &QueryProgress) {
        self.progress.lock().push(progress.clone());
    }

    fn on_partial_results(&self, result: &QueryResult) {
        self.partials.lock().push(result.clone());
    }
}

pub fn feature_collection(features: Vec<serde_json::Value>) -> String {
    json!({ "type": "FeatureCollection", "features": features }).to_string()
}

/// Axis-aligned square polygon feature.
pub fn square(
    name: &str,
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
) -> serde_json::Value {
    json!({
        "type": "Feature",
        "properties": { "NAME": name },
        "geometry": {
            "type": "Polygon",
            "coordinates": [[
                [min_lon, min_lat],
                [max_lon, min_lat],
                [max_lon, max_lat],
                [min_lon, max_lat],
                [min_lon, min_lat]
            ]]
        }
    })
}

pub fn point(name: &str, lon: f64, lat: f64) -> serde_json::Value {
    json!({
        "type": "Feature",
        "properties": { "name": name },
        "geometry": { "type": "Point", "coordinates": [lon, lat] }
    })
}

pub fn line(name: &str, coordinates: &[(f64, f64)]) -> serde_json::Value {
    let coordinates: Vec<[f64; 2]> = coordinates.iter().map(|&(x, y)| [x, y]).collect();
    json!({
        "type": "Feature",
        "properties": { "name": name },
        "geometry": { "type": "LineString", "coordinates": coordinates }
    })
}

/// `count` points spread along a short east-west line near Houston.
pub fn many_points(count: usize) -> String {
    let features = (0..count)
        .map(|i| point(&format!("p{}", i), -95.5 + (i % 1000) as f64 * 0.0001, 29.7))
        .collect();
    feature_collection(features)
}

/// Harris County, roughly.
pub fn harris_county() -> String {
    feature_collection(vec![square("Harris", -95.9, 29.5, -94.9, 30.2)])
}
