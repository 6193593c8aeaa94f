//! Query orchestration across the layer catalog.
//!
//! Every click becomes a [`QueryRequest`]. Preparing a request supersedes all
//! older ones: their tokens are cancelled and their listeners never hear from
//! them again. Executing a request walks the catalog in batches of
//! `max_concurrent_layers`, loading then evaluating each batch concurrently on
//! the caller's task and merging every layer into the result as it finishes.

use crate::aggregator::ResultAggregator;
use crate::cache::{LayerCache, LoadedLayer};
use crate::catalog::LayerCatalog;
use crate::compute::validation::validate_query_point;
use crate::config::EngineConfig;
use crate::error::{ProbeError, Result};
use crate::evaluator::{ChunkedEvaluator, LayerMatches};
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use geoprobe_types::layer::LayerDescriptor;
use geoprobe_types::result::{
    LayerDiagnostics, LayerError, LayerErrorKind, QueryPoint, QueryProgress, QueryResult,
    QueryState, ScanStatus,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Receives notifications for the query that is currently being displayed.
///
/// Both callbacks run synchronously on the query's task and must not block.
pub trait QueryListener: Send + Sync {
    fn on_progress(&self, _progress: &QueryProgress) {}

    /// Called after each layer settles, with the result accumulated so far.
    fn on_partial_results(&self, _result: &QueryResult) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl QueryListener for NoopListener {}

/// A prepared query, ready to [`execute`](QueryOrchestrator::execute).
#[derive(Debug)]
pub struct QueryRequest {
    query_id: u64,
    point: QueryPoint,
    token: CancellationToken,
}

impl QueryRequest {
    pub fn query_id(&self) -> u64 {
        self.query_id
    }

    pub fn point(&self) -> QueryPoint {
        self.point
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

/// Scheduling rank of a layer. Lower runs earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PlanRank {
    Priority(usize),
    Cached(usize),
    Sized(u64),
    Unsized,
}

/// Deregisters a query when `execute` returns or its future is dropped.
struct ActiveGuard<'a> {
    active: &'a DashMap<u64, CancellationToken>,
    query_id: u64,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.query_id);
    }
}

type LoadOutcome<'a> = (&'a LayerDescriptor, Result<LoadedLayer>, Duration);

/// Drives queries over a catalog, sharing one layer cache between them.
pub struct QueryOrchestrator {
    catalog: Arc<LayerCatalog>,
    cache: Arc<LayerCache>,
    config: EngineConfig,
    evaluator: ChunkedEvaluator,
    aggregator: ResultAggregator,
    next_query_id: AtomicU64,
    latest: AtomicU64,
    active: DashMap<u64, CancellationToken>,
}

impl QueryOrchestrator {
    pub fn new(
        catalog: Arc<LayerCatalog>,
        cache: Arc<LayerCache>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.check()?;
        for id in &config.priority_layers {
            if catalog.position(id).is_none() {
                log::warn!("Priority layer {} is not in the catalog", id);
            }
        }

        Ok(Self {
            evaluator: ChunkedEvaluator::from_config(&config),
            aggregator: ResultAggregator::new(config.nearest_limit),
            catalog,
            cache,
            config,
            next_query_id: AtomicU64::new(0),
            latest: AtomicU64::new(0),
            active: DashMap::new(),
        })
    }

    pub fn catalog(&self) -> &Arc<LayerCatalog> {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<LayerCache> {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Id of the most recently prepared query, 0 before the first one.
    pub fn latest_query_id(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    fn is_current(&self, query_id: u64) -> bool {
        self.latest_query_id() == query_id
    }

    /// Validates a clicked point and registers a new query for it.
    ///
    /// Every older query still running is cancelled. An invalid point is
    /// rejected without touching the queries already in progress.
    pub fn prepare(&self, lon: f64, lat: f64) -> Result<QueryRequest> {
        validate_query_point(lon, lat, &self.config.region)?;

        let query_id = self.next_query_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.latest.fetch_max(query_id, Ordering::SeqCst);

        let mut superseded = 0;
        for entry in self.active.iter() {
            if *entry.key() < query_id && !entry.value().is_cancelled() {
                entry.value().cancel();
                superseded += 1;
            }
        }
        if superseded > 0 {
            log::debug!("Query {} superseded {} older queries", query_id, superseded);
        }

        let token = CancellationToken::new();
        self.active.insert(query_id, token.clone());

        Ok(QueryRequest {
            query_id,
            point: QueryPoint::new(lon, lat),
            token,
        })
    }

    /// Prepares and executes a query in one step.
    pub async fn submit_query(
        &self,
        lon: f64,
        lat: f64,
        listener: &dyn QueryListener,
    ) -> Result<QueryResult> {
        let request = self.prepare(lon, lat)?;
        self.execute(request, listener).await
    }

    /// Cancels a running query. Returns `false` if it is unknown or settled.
    pub fn cancel(&self, query_id: u64) -> bool {
        match self.active.get(&query_id) {
            Some(token) => {
                token.cancel();
                log::debug!("Query {} cancelled", query_id);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for entry in self.active.iter() {
            entry.value().cancel();
        }
    }

    /// Runs a prepared query to completion or cancellation.
    ///
    /// Per-layer failures are recorded on the result and never fail the
    /// query. The only error is [`ProbeError::UnknownQuery`], returned when
    /// the request was not prepared by this orchestrator or already ran.
    pub async fn execute(
        &self,
        request: QueryRequest,
        listener: &dyn QueryListener,
    ) -> Result<QueryResult> {
        let started = Instant::now();
        let query_id = request.query_id;

        if !self.active.contains_key(&query_id) {
            let mut result = QueryResult::new(query_id, request.point, 0);
            result.state = QueryState::Failed;
            if query_id >= self.latest_query_id() {
                listener.on_progress(&result.progress());
            }
            log::warn!("Query {} is unknown or already settled", query_id);
            return Err(ProbeError::UnknownQuery(query_id));
        }
        let _registered = ActiveGuard {
            active: &self.active,
            query_id,
        };

        let total_layers = self.catalog.active().count();
        let mut result = QueryResult::new(query_id, request.point, total_layers);
        log::info!(
            "Query {} at ({}, {}) across {} layers",
            query_id,
            request.point.lon,
            request.point.lat,
            total_layers
        );

        let plan = tokio::select! {
            biased;
            _ = request.token.cancelled() => Vec::new(),
            plan = self.plan() => plan,
        };

        let concurrency = self.config.max_concurrent_layers;
        let query_budget = self.config.query_budget();
        let mut scheduled = 0;

        while scheduled < plan.len() {
            if request.token.is_cancelled() {
                break;
            }
            if let Some(budget) = query_budget
                && started.elapsed() >= budget
            {
                self.record_budget_exhausted(&mut result, &plan[scheduled..], budget);
                break;
            }

            let end = (scheduled + concurrency).min(plan.len());
            let batch = &plan[scheduled..end];
            scheduled = end;

            self.advance(&mut result, QueryState::Loading, listener);
            let loaded = self.load_batch(batch, &request.token).await;

            if request.token.is_cancelled() {
                break;
            }

            self.advance(&mut result, QueryState::Evaluating, listener);
            self.evaluate_batch(loaded, &request, &mut result, listener)
                .await;
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        if request.token.is_cancelled() {
            result.is_complete = false;
            self.advance(&mut result, QueryState::Cancelled, listener);
            log::info!(
                "Query {} cancelled after {} of {} layers",
                query_id,
                result.processed_layer_count,
                result.total_layer_count
            );
        } else {
            self.aggregator.finalize(&mut result);
            result.is_complete = true;
            self.advance(&mut result, QueryState::Complete, listener);
            log::info!(
                "Query {} complete: {} polygon matches, {} nearby features, {} errors in {} ms",
                query_id,
                result.polygon_matches.len(),
                result.nearest_points.len(),
                result.errors.len(),
                result.elapsed_ms
            );
        }

        Ok(result)
    }

    /// Orders the active layers for scheduling.
    async fn plan(&self) -> Vec<&LayerDescriptor> {
        let hint_timeout = self.config.load_timeout();
        let ranked = futures::stream::iter(self.catalog.active())
            .map(|descriptor| async move {
                let rank = if let Some(position) = self
                    .config
                    .priority_layers
                    .iter()
                    .position(|id| *id == descriptor.id)
                {
                    PlanRank::Priority(position)
                } else if let Some(entry) = self.cache.peek(&descriptor.id) {
                    PlanRank::Cached(entry.feature_count)
                } else {
                    match self.cache.size_hint(descriptor, hint_timeout).await {
                        Some(bytes) => PlanRank::Sized(bytes),
                        None => PlanRank::Unsized,
                    }
                };
                (rank, descriptor)
            })
            .buffered(self.config.max_concurrent_layers);

        let mut ranked: Vec<(PlanRank, &LayerDescriptor)> = ranked.collect().await;
        // Stable: ties keep catalog order.
        ranked.sort_by_key(|(rank, _)| *rank);
        ranked.into_iter().map(|(_, descriptor)| descriptor).collect()
    }

    /// Loads a batch concurrently. A cancelled token abandons every load
    /// still in flight; the cache hands those fetches to whoever waits next.
    async fn load_batch<'a>(
        &self,
        batch: &[&'a LayerDescriptor],
        token: &CancellationToken,
    ) -> Vec<LoadOutcome<'a>> {
        let timeout = self.config.load_timeout();
        batch
            .iter()
            .map(|&descriptor| async move {
                let started = Instant::now();
                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ProbeError::Cancelled),
                    loaded = tokio::time::timeout(timeout, self.cache.load(descriptor)) => {
                        loaded.unwrap_or_else(|_| {
                            Err(ProbeError::FetchFailed {
                                layer_id: descriptor.id.clone(),
                                reason: format!("timed out after {} ms", timeout.as_millis()),
                            })
                        })
                    }
                };
                (descriptor, outcome, started.elapsed())
            })
            .collect::<FuturesUnordered<_>>()
            .collect()
            .await
    }

    async fn evaluate_batch(
        &self,
        loaded: Vec<LoadOutcome<'_>>,
        request: &QueryRequest,
        result: &mut QueryResult,
        listener: &dyn QueryListener,
    ) {
        let point = request.point.to_geo();
        let token = &request.token;
        let evaluator = &self.evaluator;

        let mut evaluations = FuturesUnordered::new();
        for (descriptor, outcome, load_time) in loaded {
            match outcome {
                Ok(layer) => evaluations.push(async move {
                    let outcome = evaluator.evaluate(&layer.entry, &point, token).await;
                    (descriptor, layer, load_time, outcome)
                }),
                Err(e) => {
                    result.diagnostics.push(LayerDiagnostics {
                        layer_id: descriptor.id.clone(),
                        status: ScanStatus::Failed,
                        origin: None,
                        feature_count: 0,
                        scanned: 0,
                        malformed: 0,
                        load_ms: load_time.as_millis() as u64,
                        eval_ms: 0,
                    });
                    self.record_error(result, descriptor, &e, listener);
                }
            }
        }

        while let Some((descriptor, layer, load_time, outcome)) = evaluations.next().await {
            match outcome {
                Ok(matches) if !token.is_cancelled() => {
                    result
                        .diagnostics
                        .push(diagnostics_for(&matches, &layer, load_time));
                    log::debug!(
                        "Query {}: layer {} produced {} matches",
                        request.query_id,
                        descriptor.id,
                        matches.match_count()
                    );
                    self.aggregator.merge(matches, result);
                    result.processed_layer_count += 1;
                    self.deliver_partial(result, listener);
                }
                Ok(_) | Err(ProbeError::Cancelled) => {
                    log::debug!(
                        "Query {}: discarding layer {} after cancellation",
                        request.query_id,
                        descriptor.id
                    );
                }
                Err(e) => {
                    result.diagnostics.push(LayerDiagnostics {
                        layer_id: descriptor.id.clone(),
                        status: ScanStatus::Failed,
                        origin: Some(layer.origin),
                        feature_count: layer.entry.feature_count,
                        scanned: 0,
                        malformed: 0,
                        load_ms: load_time.as_millis() as u64,
                        eval_ms: 0,
                    });
                    self.record_error(result, descriptor, &e, listener);
                }
            }
        }
    }

    fn record_error(
        &self,
        result: &mut QueryResult,
        descriptor: &LayerDescriptor,
        error: &ProbeError,
        listener: &dyn QueryListener,
    ) {
        log::warn!(
            "Query {}: layer {} failed: {}",
            result.query_id,
            descriptor.id,
            error
        );
        result.errors.push(LayerError {
            layer_id: descriptor.id.clone(),
            layer_name: descriptor.name.clone(),
            kind: error_kind(error),
            message: error.to_string(),
        });
        result.processed_layer_count += 1;
        self.deliver_partial(result, listener);
    }

    fn record_budget_exhausted(
        &self,
        result: &mut QueryResult,
        unscheduled: &[&LayerDescriptor],
        budget: Duration,
    ) {
        log::warn!(
            "Query {} spent its {} ms budget, skipping {} layers",
            result.query_id,
            budget.as_millis(),
            unscheduled.len()
        );
        for descriptor in unscheduled {
            result.errors.push(LayerError {
                layer_id: descriptor.id.clone(),
                layer_name: descriptor.name.clone(),
                kind: LayerErrorKind::QueryBudgetExceeded,
                message: format!(
                    "query budget of {} ms spent before layer was scheduled",
                    budget.as_millis()
                ),
            });
        }
    }

    fn deliver_partial(&self, result: &QueryResult, listener: &dyn QueryListener) {
        if self.is_current(result.query_id) {
            listener.on_partial_results(result);
        }
    }

    fn advance(&self, result: &mut QueryResult, next: QueryState, listener: &dyn QueryListener) {
        if result.state == next {
            return;
        }
        debug_assert!(
            result.state.can_transition_to(next),
            "illegal transition {} -> {}",
            result.state,
            next
        );
        log::debug!("Query {}: {} -> {}", result.query_id, result.state, next);
        result.state = next;
        if self.is_current(result.query_id) {
            listener.on_progress(&result.progress());
        }
    }
}

fn error_kind(error: &ProbeError) -> LayerErrorKind {
    match error {
        ProbeError::FetchFailed { .. } => LayerErrorKind::FetchFailed,
        ProbeError::InvalidFormat { .. } => LayerErrorKind::InvalidFormat,
        _ => LayerErrorKind::Evaluation,
    }
}

fn diagnostics_for(
    matches: &LayerMatches,
    layer: &LoadedLayer,
    load_time: Duration,
) -> LayerDiagnostics {
    LayerDiagnostics {
        layer_id: matches.layer_id.clone(),
        status: matches.status(),
        origin: Some(layer.origin),
        feature_count: matches.summary.total,
        scanned: matches.summary.scanned,
        malformed: matches.summary.malformed,
        load_ms: load_time.as_millis() as u64,
        eval_ms: matches.summary.elapsed.as_millis() as u64,
    }
}
