mod common;

use common::*;
use geoprobe::prelude::*;
use geoprobe::{LayerErrorKind, LoadOrigin, ScanStatus, group_by_layer};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const HOUSTON: (f64, f64) = (-95.37, 29.76);

fn counties() -> LayerDescriptor {
    LayerDescriptor::new("counties", "Counties", GeometryKind::Polygon, "counties.geojson")
        .as_default()
}

fn wells() -> LayerDescriptor {
    LayerDescriptor::new("wells", "Wells", GeometryKind::Point, "wells.geojson")
}

fn houston_source() -> CountingSource {
    CountingSource::new()
        .with_document(
            "counties.geojson",
            feature_collection(vec![square("Harris", -96.0, 29.0, -95.0, 30.0)]),
        )
        .with_document(
            "wells.geojson",
            feature_collection(vec![
                point("Bayou Well", -95.40, 29.70),
                point("Dallas Well", -96.80, 32.78),
            ]),
        )
}

fn engine(
    layers: Vec<LayerDescriptor>,
    source: Arc<CountingSource>,
    config: EngineConfig,
) -> QueryOrchestrator {
    init_logging();
    EngineBuilder::new()
        .catalog(LayerCatalog::new(layers).unwrap())
        .shared_source(source)
        .config(config)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_click_in_houston() {
    let source = Arc::new(houston_source());
    let engine = engine(vec![counties(), wells()], source.clone(), EngineConfig::default());

    let result = engine
        .submit_query(HOUSTON.0, HOUSTON.1, &NoopListener)
        .await
        .unwrap();

    assert_eq!(result.state, QueryState::Complete);
    assert!(result.is_complete);
    assert!(result.errors.is_empty());
    assert_eq!(result.processed_layer_count, 2);
    assert_eq!(result.total_layer_count, 2);

    assert_eq!(result.polygon_matches.len(), 1);
    let county = &result.polygon_matches[0];
    assert_eq!(county.layer_id, "counties");
    assert_eq!(county.feature.display_name().as_deref(), Some("Harris"));

    assert_eq!(result.nearest_points.len(), 1);
    let well = &result.nearest_points[0];
    assert_eq!(well.layer_id, "wells");
    assert_eq!(well.geometry_kind, GeometryKind::Point);
    assert!(
        well.distance_km > 7.0 && well.distance_km < 7.5,
        "unexpected distance {}",
        well.distance_km
    );
}

#[tokio::test]
async fn test_skipped_layer_is_never_fetched() {
    let source = Arc::new(
        houston_source().with_document("parcels.geojson", harris_county()),
    );
    let parcels =
        LayerDescriptor::new("parcels", "Parcels", GeometryKind::Polygon, "parcels.geojson")
            .skipped();
    let engine = engine(
        vec![counties(), parcels, wells()],
        source.clone(),
        EngineConfig::default(),
    );

    let result = engine
        .submit_query(HOUSTON.0, HOUSTON.1, &NoopListener)
        .await
        .unwrap();

    assert_eq!(source.calls("parcels.geojson"), 0);
    assert_eq!(result.total_layer_count, 2);
    assert!(result.polygon_matches.iter().all(|m| m.layer_id != "parcels"));
}

#[tokio::test]
async fn test_failed_layer_does_not_abort_query() {
    let source = Arc::new(houston_source().failing("wells.geojson"));
    let engine = engine(vec![counties(), wells()], source.clone(), EngineConfig::default());

    let result = engine
        .submit_query(HOUSTON.0, HOUSTON.1, &NoopListener)
        .await
        .unwrap();

    assert!(result.is_complete);
    assert_eq!(result.processed_layer_count, 2);
    assert_eq!(result.polygon_matches.len(), 1);
    assert!(result.nearest_points.is_empty());

    assert_eq!(result.errors.len(), 1);
    let error = &result.errors[0];
    assert_eq!(error.layer_id, "wells");
    assert_eq!(error.layer_name, "Wells");
    assert_eq!(error.kind, LayerErrorKind::FetchFailed);
    assert!(error.message.contains("503"));

    let diagnostics = result
        .diagnostics
        .iter()
        .find(|d| d.layer_id == "wells")
        .unwrap();
    assert_eq!(diagnostics.status, ScanStatus::Failed);

    // Failures are not cached.
    engine
        .submit_query(HOUSTON.0, HOUSTON.1, &NoopListener)
        .await
        .unwrap();
    assert_eq!(source.calls("wells.geojson"), 2);
    assert_eq!(source.calls("counties.geojson"), 1);
}

/// Cancels its query once it has seen `after` partial results.
struct CancelAfter {
    after: usize,
    seen: Mutex<usize>,
    token: CancellationToken,
}

impl QueryListener for CancelAfter {
    fn on_partial_results(&self, _result: &QueryResult) {
        let mut seen = self.seen.lock();
        *seen += 1;
        if *seen == self.after {
            self.token.cancel();
        }
    }
}

#[tokio::test]
async fn test_cancel_stops_scheduling_new_layers() {
    let mut source = CountingSource::new();
    let mut layers = Vec::new();
    for i in 0..5 {
        let locator = format!("layer{}.geojson", i);
        source = source.with_document(&locator, harris_county());
        layers.push(LayerDescriptor::new(
            format!("layer{}", i),
            format!("Layer {}", i),
            GeometryKind::Polygon,
            locator,
        ));
    }
    let source = Arc::new(source);
    let engine = engine(
        layers,
        source.clone(),
        EngineConfig::default().with_max_concurrent_layers(1),
    );

    let request = engine.prepare(HOUSTON.0, HOUSTON.1).unwrap();
    let listener = CancelAfter {
        after: 2,
        seen: Mutex::new(0),
        token: request.token().clone(),
    };
    let result = engine.execute(request, &listener).await.unwrap();

    assert_eq!(result.state, QueryState::Cancelled);
    assert!(!result.is_complete);
    assert_eq!(result.processed_layer_count, 2);
    assert_eq!(result.polygon_matches.len(), 2);
    assert_eq!(source.total_calls(), 2);
    assert_eq!(source.calls("layer2.geojson"), 0);
}

#[tokio::test]
async fn test_last_click_wins() {
    let source = Arc::new(houston_source().with_delay(Duration::from_millis(40)));
    let engine = engine(vec![counties(), wells()], source.clone(), EngineConfig::default());

    let first_listener = RecordingListener::default();
    let second_listener = RecordingListener::default();

    let first = engine.submit_query(HOUSTON.0, HOUSTON.1, &first_listener);
    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.submit_query(-95.39, 29.72, &second_listener).await
    };
    let (first, second) = tokio::join!(first, second);
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(second.query_id > first.query_id);
    assert_eq!(engine.latest_query_id(), second.query_id);

    assert_eq!(first.state, QueryState::Cancelled);
    assert!(!first.is_complete);
    assert_eq!(first_listener.partial_count(), 0);
    assert!(!first_listener.states().contains(&QueryState::Cancelled));

    assert_eq!(second.state, QueryState::Complete);
    assert!(second.is_complete);
    assert_eq!(second.polygon_matches.len(), 1);
    assert_eq!(second_listener.partial_count(), 2);
    assert_eq!(second_listener.states().last(), Some(&QueryState::Complete));

    // The first query dropped its fetches when superseded, so the second
    // query had to start its own.
    assert_eq!(source.calls("counties.geojson"), 2);
    assert_eq!(source.calls("wells.geojson"), 2);
    assert!(
        second
            .diagnostics
            .iter()
            .all(|d| d.origin == Some(LoadOrigin::Fetched))
    );
    assert_eq!(engine.cache().stats().in_flight, 0);
}

#[tokio::test]
async fn test_superseded_query_stops_waiting_on_loads() {
    let source = Arc::new(houston_source().with_delay(Duration::from_millis(800)));
    let engine = engine(vec![counties(), wells()], source.clone(), EngineConfig::default());

    let started = Instant::now();
    let first = async {
        let result = engine
            .submit_query(HOUSTON.0, HOUSTON.1, &NoopListener)
            .await;
        (result, started.elapsed())
    };
    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.submit_query(-95.39, 29.72, &NoopListener).await
    };
    let ((first, first_elapsed), second) = tokio::join!(first, second);

    assert_eq!(first.unwrap().state, QueryState::Cancelled);
    assert!(first_elapsed < Duration::from_millis(300));
    assert_eq!(second.unwrap().state, QueryState::Complete);
}

#[tokio::test]
async fn test_cancel_during_slow_load_resolves_promptly() {
    let source = Arc::new(houston_source().with_delay(Duration::from_millis(800)));
    let engine = engine(vec![counties(), wells()], source.clone(), EngineConfig::default());

    let request = engine.prepare(HOUSTON.0, HOUSTON.1).unwrap();
    let token = request.token().clone();
    let started = Instant::now();
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    };
    let (result, ()) = tokio::join!(engine.execute(request, &NoopListener), cancel);
    let result = result.unwrap();

    assert!(started.elapsed() < Duration::from_millis(300));
    assert_eq!(result.state, QueryState::Cancelled);
    assert!(!result.is_complete);
    assert_eq!(result.processed_layer_count, 0);
    assert_eq!(source.calls("counties.geojson"), 1);
    assert_eq!(engine.cache().stats().in_flight, 0);
    assert!(engine.cache().peek("counties").is_none());
}

#[tokio::test]
async fn test_stalled_size_hints_do_not_block_queries() {
    let source = Arc::new(houston_source().stall_size_hints());
    let config = EngineConfig::default().with_load_timeout(Duration::from_millis(50));
    let engine = engine(vec![counties(), wells()], source.clone(), config);

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        engine.submit_query(HOUSTON.0, HOUSTON.1, &NoopListener),
    )
    .await
    .expect("query hung on size hints")
    .unwrap();

    assert!(result.is_complete);
    assert_eq!(result.processed_layer_count, 2);
    assert_eq!(result.polygon_matches.len(), 1);
    assert_eq!(result.nearest_points.len(), 1);
}

#[tokio::test]
async fn test_cancel_while_planning() {
    let source = Arc::new(houston_source().stall_size_hints());
    let engine = engine(vec![counties(), wells()], source.clone(), EngineConfig::default());

    let request = engine.prepare(HOUSTON.0, HOUSTON.1).unwrap();
    let token = request.token().clone();
    let listener = RecordingListener::default();
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    };

    let (result, ()) = tokio::time::timeout(
        Duration::from_secs(2),
        async { tokio::join!(engine.execute(request, &listener), cancel) },
    )
    .await
    .expect("cancelled query hung while planning");
    let result = result.unwrap();

    assert_eq!(result.state, QueryState::Cancelled);
    assert_eq!(result.total_layer_count, 2);
    assert_eq!(result.processed_layer_count, 0);
    assert_eq!(source.total_calls(), 0);
    assert_eq!(listener.states(), vec![QueryState::Cancelled]);
}

#[tokio::test]
async fn test_size_hints_asked_once_per_layer() {
    let source = Arc::new(houston_source().failing("wells.geojson"));
    let engine = engine(vec![counties(), wells()], source.clone(), EngineConfig::default());

    for _ in 0..3 {
        engine
            .submit_query(HOUSTON.0, HOUSTON.1, &NoopListener)
            .await
            .unwrap();
    }

    // counties is cached after the first query; wells keeps failing and
    // is ranked from its remembered hint.
    assert_eq!(source.hint_calls(), 2);
    assert_eq!(source.calls("wells.geojson"), 3);
}

#[tokio::test]
async fn test_second_query_uses_cache() {
    let source = Arc::new(houston_source());
    let engine = engine(vec![counties(), wells()], source.clone(), EngineConfig::default());

    let first = engine
        .submit_query(HOUSTON.0, HOUSTON.1, &NoopListener)
        .await
        .unwrap();
    let second = engine
        .submit_query(-95.5, 29.9, &NoopListener)
        .await
        .unwrap();

    assert!(
        first
            .diagnostics
            .iter()
            .all(|d| d.origin == Some(LoadOrigin::Fetched))
    );
    assert!(
        second
            .diagnostics
            .iter()
            .all(|d| d.origin == Some(LoadOrigin::Cached))
    );
    assert_eq!(source.total_calls(), 2);
    assert_eq!(engine.cache().stats().hits, 2);
}

#[tokio::test]
async fn test_prefetch_then_query() {
    let source = Arc::new(houston_source());
    let engine = engine(vec![counties(), wells()], source.clone(), EngineConfig::default());

    let report = engine.cache().prefetch_defaults(engine.catalog(), 2).await;
    assert_eq!(report.loaded, vec!["counties".to_string()]);
    assert!(engine.cache().peek("wells").is_none());

    let result = engine
        .submit_query(HOUSTON.0, HOUSTON.1, &NoopListener)
        .await
        .unwrap();
    let origin_of = |id: &str| {
        result
            .diagnostics
            .iter()
            .find(|d| d.layer_id == id)
            .and_then(|d| d.origin)
    };
    assert_eq!(origin_of("counties"), Some(LoadOrigin::Cached));
    assert_eq!(origin_of("wells"), Some(LoadOrigin::Fetched));
    assert_eq!(source.calls("counties.geojson"), 1);
}

#[tokio::test]
async fn test_query_budget_skips_unscheduled_layers() {
    let source = Arc::new(
        houston_source()
            .with_document("districts.geojson", harris_county())
            .with_delay(Duration::from_millis(50)),
    );
    let districts =
        LayerDescriptor::new("districts", "Districts", GeometryKind::Polygon, "districts.geojson");
    let config = EngineConfig::default()
        .with_max_concurrent_layers(1)
        .with_query_budget(Duration::from_millis(25));
    let engine = engine(vec![counties(), wells(), districts], source.clone(), config);

    let result = engine
        .submit_query(HOUSTON.0, HOUSTON.1, &NoopListener)
        .await
        .unwrap();

    assert_eq!(result.state, QueryState::Complete);
    assert!(result.is_complete);
    assert_eq!(result.processed_layer_count, 1);
    assert_eq!(source.total_calls(), 1);

    let skipped: Vec<&str> = result
        .errors
        .iter()
        .filter(|e| e.kind == LayerErrorKind::QueryBudgetExceeded)
        .map(|e| e.layer_id.as_str())
        .collect();
    assert_eq!(skipped, vec!["wells", "districts"]);
}

#[tokio::test]
async fn test_priority_layers_run_first() {
    let source = Arc::new(houston_source());
    let config = EngineConfig::default()
        .with_max_concurrent_layers(1)
        .with_priority_layers(["wells"]);
    let engine = engine(vec![counties(), wells()], source, config);
    let listener = RecordingListener::default();

    engine
        .submit_query(HOUSTON.0, HOUSTON.1, &listener)
        .await
        .unwrap();

    let partials = listener.partials.lock();
    assert_eq!(partials.len(), 2);
    assert_eq!(partials[0].diagnostics[0].layer_id, "wells");
    assert_eq!(partials[0].processed_layer_count, 1);
    assert_eq!(partials[1].processed_layer_count, 2);
}

#[tokio::test]
async fn test_nearest_points_sorted_and_capped() {
    let features = (0..25)
        .map(|i| point(&format!("w{}", i), -95.37 + 0.01 * (25 - i) as f64, 29.76))
        .collect();
    let source = Arc::new(
        CountingSource::new().with_document("wells.geojson", feature_collection(features)),
    );
    let engine = engine(vec![wells()], source, EngineConfig::default());

    let result = engine
        .submit_query(HOUSTON.0, HOUSTON.1, &NoopListener)
        .await
        .unwrap();

    assert_eq!(result.nearest_points.len(), 10);
    assert!(
        result
            .nearest_points
            .windows(2)
            .all(|w| w[0].distance_km <= w[1].distance_km)
    );
    assert_eq!(
        result.nearest_points[0].feature.display_name().as_deref(),
        Some("w24")
    );
}

#[tokio::test]
async fn test_line_layer_proximity() {
    let roads = LayerDescriptor::new("roads", "Roads", GeometryKind::Line, "roads.geojson");
    let source = Arc::new(houston_source().with_document(
        "roads.geojson",
        feature_collection(vec![
            line("I-10", &[(-96.0, 29.78), (-95.0, 29.78)]),
            line("US-290", &[(-98.0, 31.5), (-97.5, 31.9)]),
        ]),
    ));
    let engine = engine(vec![counties(), wells(), roads], source, EngineConfig::default());

    let result = engine
        .submit_query(HOUSTON.0, HOUSTON.1, &NoopListener)
        .await
        .unwrap();

    assert_eq!(result.nearest_points.len(), 2);
    let road = &result.nearest_points[0];
    assert_eq!(road.layer_id, "roads");
    assert_eq!(road.geometry_kind, GeometryKind::Line);
    assert!(road.distance_km > 2.0 && road.distance_km < 2.5);
}

#[tokio::test]
async fn test_overlapping_polygons_grouped_by_layer() {
    let districts =
        LayerDescriptor::new("districts", "Districts", GeometryKind::Polygon, "districts.geojson");
    let source = Arc::new(houston_source().with_document(
        "districts.geojson",
        feature_collection(vec![
            square("District 7", -95.6, 29.6, -95.2, 29.9),
            square("District 18", -95.5, 29.7, -95.3, 29.8),
            square("District 2", -94.5, 29.6, -94.0, 29.9),
        ]),
    ));
    let engine = engine(vec![counties(), districts], source, EngineConfig::default());

    let result = engine
        .submit_query(HOUSTON.0, HOUSTON.1, &NoopListener)
        .await
        .unwrap();

    let groups = group_by_layer(&result.polygon_matches);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups["Counties"].len(), 1);
    assert_eq!(groups["Districts"].len(), 2);
}

#[tokio::test]
async fn test_layers_from_directory() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("counties.geojson"), harris_county()).unwrap();
    std::fs::create_dir(dir.path().join("points")).unwrap();
    std::fs::write(
        dir.path().join("points/wells.geojson"),
        feature_collection(vec![point("Bayou Well", -95.40, 29.70)]),
    )
    .unwrap();

    let catalog = LayerCatalog::from_json(
        r#"{"layers": [
            {"id": "counties", "name": "Counties", "geometry_kind": "polygon",
             "source": "counties.geojson", "is_default": true},
            {"id": "wells", "name": "Wells", "geometry_kind": "point",
             "source": "points/wells.geojson"}
        ]}"#,
    )
    .unwrap();
    let engine = EngineBuilder::new()
        .catalog(catalog)
        .layer_directory(dir.path())
        .build()
        .unwrap();

    let result = engine
        .submit_query(HOUSTON.0, HOUSTON.1, &NoopListener)
        .await
        .unwrap();

    assert!(result.is_complete);
    assert_eq!(result.polygon_matches.len(), 1);
    assert_eq!(result.nearest_points.len(), 1);

    let json = result.to_json().unwrap();
    assert!(json.contains("Harris"));
    assert!(json.contains("\"state\":\"complete\""));
}
