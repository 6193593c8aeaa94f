//! Layer loading with memoization and request coalescing.
//!
//! ```text
//! load(counties) ─┐
//!                 │                          LayerSource
//! load(counties) ─┼──► LayerCache ──────────► fetch(locator)
//!                 │       │                        │
//! prefetch ───────┘       │                        │
//!                         ▼                        ▼
//!                 [all callers get the      [one fetch]
//!                  same Arc entry] ◄───────────────┘
//! ```
//!
//! Entries are immutable once inserted and are only ever dropped all at once
//! by [`LayerCache::clear`]. Failed loads are never cached, so the next call
//! retries.

use crate::catalog::LayerCatalog;
use crate::compute::geojson::parse_feature_collection;
use crate::error::{ProbeError, Result};
use crate::source::LayerSource;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use geoprobe_types::feature::FeatureCollection;
use geoprobe_types::layer::{GeometryKind, LayerDescriptor};
use geoprobe_types::result::LoadOrigin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// A loaded layer, shared read-only with every query that evaluates it.
#[derive(Debug)]
pub struct LayerCacheEntry {
    pub layer_id: String,
    pub layer_name: String,
    pub geometry_kind: GeometryKind,
    pub collection: FeatureCollection,
    pub feature_count: usize,
    /// Feature count exceeds the configured large-layer threshold.
    pub is_large: bool,
    pub load_duration: Duration,
    pub byte_size: usize,
}

/// Result of [`LayerCache::load`].
#[derive(Debug, Clone)]
pub struct LoadedLayer {
    pub entry: Arc<LayerCacheEntry>,
    pub origin: LoadOrigin,
}

/// Counters for monitoring cache effectiveness.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    /// Loads answered from memory.
    pub hits: u64,
    /// Loads that reached the layer source.
    pub fetches: u64,
    /// Loads that waited on another caller's fetch.
    pub coalesced: u64,
    pub failures: u64,
}

/// Outcome of [`LayerCache::prefetch_defaults`].
#[derive(Debug, Default)]
pub struct PrefetchReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, ProbeError)>,
}

type SharedLoad = std::result::Result<Arc<LayerCacheEntry>, ProbeError>;

struct InFlight {
    ticket: u64,
    sender: broadcast::Sender<SharedLoad>,
}

enum Registration {
    Cached(Arc<LayerCacheEntry>),
    Leader {
        ticket: u64,
        sender: broadcast::Sender<SharedLoad>,
    },
    Follower(broadcast::Receiver<SharedLoad>),
}

/// Removes the in-flight marker if the leading load is dropped before it
/// finishes, so waiters see a closed channel and retry instead of hanging.
struct InFlightGuard<'a> {
    cache: &'a LayerCache,
    layer_id: &'a str,
    ticket: u64,
    sender: Option<broadcast::Sender<SharedLoad>>,
}

impl InFlightGuard<'_> {
    fn complete(mut self, outcome: SharedLoad) {
        self.cache.release(self.layer_id, self.ticket);
        if let Some(sender) = self.sender.take() {
            // No receivers is fine: nobody was waiting.
            let _ = sender.send(outcome);
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            log::debug!(
                "Load of layer {} abandoned before completion",
                self.layer_id
            );
            self.cache.release(self.layer_id, self.ticket);
        }
    }
}

/// Process-lifetime cache of decoded layers.
pub struct LayerCache {
    source: Arc<dyn LayerSource>,
    large_layer_threshold: usize,
    entries: DashMap<String, Arc<LayerCacheEntry>>,
    in_flight: DashMap<String, InFlight>,
    size_hints: DashMap<String, Option<u64>>,
    /// Bumped by `clear` so loads started earlier do not repopulate the cache.
    generation: AtomicU64,
    next_ticket: AtomicU64,
    hits: AtomicU64,
    fetches: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

impl LayerCache {
    pub fn new(source: Arc<dyn LayerSource>, large_layer_threshold: usize) -> Self {
        Self {
            source,
            large_layer_threshold,
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            size_hints: DashMap::new(),
            generation: AtomicU64::new(0),
            next_ticket: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn source(&self) -> &Arc<dyn LayerSource> {
        &self.source
    }

    /// Returns the cached entry for `layer_id` without loading.
    pub fn peek(&self, layer_id: &str) -> Option<Arc<LayerCacheEntry>> {
        self.entries.get(layer_id).map(|e| Arc::clone(e.value()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Loads a layer, sharing one fetch between concurrent callers.
    pub async fn load(&self, descriptor: &LayerDescriptor) -> Result<LoadedLayer> {
        if descriptor.skip {
            return Err(ProbeError::InvalidInput(format!(
                "layer '{}' is administratively skipped",
                descriptor.id
            )));
        }

        loop {
            if let Some(entry) = self.peek(&descriptor.id) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(LoadedLayer {
                    entry,
                    origin: LoadOrigin::Cached,
                });
            }

            match self.register(&descriptor.id) {
                Registration::Cached(entry) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(LoadedLayer {
                        entry,
                        origin: LoadOrigin::Cached,
                    });
                }
                Registration::Follower(mut receiver) => match receiver.recv().await {
                    Ok(outcome) => {
                        self.coalesced.fetch_add(1, Ordering::Relaxed);
                        return outcome.map(|entry| LoadedLayer {
                            entry,
                            origin: LoadOrigin::Coalesced,
                        });
                    }
                    Err(_) => {
                        log::debug!(
                            "In-flight load of {} went away, retrying",
                            descriptor.id
                        );
                        continue;
                    }
                },
                Registration::Leader { ticket, sender } => {
                    let guard = InFlightGuard {
                        cache: self,
                        layer_id: &descriptor.id,
                        ticket,
                        sender: Some(sender),
                    };
                    let generation = self.generation.load(Ordering::SeqCst);

                    let outcome = self.fetch_and_decode(descriptor).await;
                    match &outcome {
                        Ok(entry) if self.generation.load(Ordering::SeqCst) == generation => {
                            self.entries
                                .insert(descriptor.id.clone(), Arc::clone(entry));
                        }
                        Ok(_) => {
                            log::debug!(
                                "Cache cleared while loading {}, result not retained",
                                descriptor.id
                            );
                        }
                        Err(e) => {
                            self.failures.fetch_add(1, Ordering::Relaxed);
                            log::warn!("Failed to load layer {}: {}", descriptor.id, e);
                        }
                    }

                    guard.complete(outcome.clone());
                    return outcome.map(|entry| LoadedLayer {
                        entry,
                        origin: LoadOrigin::Fetched,
                    });
                }
            }
        }
    }

    fn register(&self, layer_id: &str) -> Registration {
        match self.in_flight.entry(layer_id.to_string()) {
            Entry::Occupied(occupied) => Registration::Follower(occupied.get().sender.subscribe()),
            Entry::Vacant(vacant) => {
                // A leader may have finished between the caller's peek and now.
                if let Some(entry) = self.peek(layer_id) {
                    return Registration::Cached(entry);
                }
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                let (sender, _) = broadcast::channel(1);
                vacant.insert(InFlight {
                    ticket,
                    sender: sender.clone(),
                });
                Registration::Leader { ticket, sender }
            }
        }
    }

    fn release(&self, layer_id: &str, ticket: u64) {
        self.in_flight
            .remove_if(layer_id, |_, in_flight| in_flight.ticket == ticket);
    }

    async fn fetch_and_decode(&self, descriptor: &LayerDescriptor) -> SharedLoad {
        let started = Instant::now();
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let payload = self
            .source
            .fetch(&descriptor.source)
            .await
            .map_err(|e| ProbeError::FetchFailed {
                layer_id: descriptor.id.clone(),
                reason: e.to_string(),
            })?;

        let collection = parse_feature_collection(&descriptor.id, &payload)?;
        let feature_count = collection.len();
        let entry = LayerCacheEntry {
            layer_id: descriptor.id.clone(),
            layer_name: descriptor.name.clone(),
            geometry_kind: descriptor.geometry_kind,
            collection,
            feature_count,
            is_large: feature_count > self.large_layer_threshold,
            load_duration: started.elapsed(),
            byte_size: payload.len(),
        };

        log::info!(
            "Loaded layer {} ({} features, {} bytes) in {:?}",
            entry.layer_id,
            entry.feature_count,
            entry.byte_size,
            entry.load_duration
        );

        Ok(Arc::new(entry))
    }

    /// Payload size reported by the source for `descriptor`, remembered per
    /// layer. A source that does not answer within `timeout` is recorded as
    /// having no hint.
    pub async fn size_hint(
        &self,
        descriptor: &LayerDescriptor,
        timeout: Duration,
    ) -> Option<u64> {
        if let Some(hint) = self.size_hints.get(&descriptor.id) {
            return *hint;
        }

        let hint = match tokio::time::timeout(timeout, self.source.size_hint(&descriptor.source))
            .await
        {
            Ok(hint) => hint,
            Err(_) => {
                log::debug!(
                    "Size hint for {} timed out after {:?}",
                    descriptor.id,
                    timeout
                );
                None
            }
        };
        self.size_hints.insert(descriptor.id.clone(), hint);
        hint
    }

    /// Warms every default layer of the catalog, `concurrency` at a time.
    pub async fn prefetch_defaults(
        &self,
        catalog: &LayerCatalog,
        concurrency: usize,
    ) -> PrefetchReport {
        let outcomes: Vec<(String, Result<LoadedLayer>)> =
            futures::stream::iter(catalog.defaults())
                .map(|descriptor| async move {
                    (descriptor.id.clone(), self.load(descriptor).await)
                })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;

        let mut report = PrefetchReport::default();
        for (layer_id, outcome) in outcomes {
            match outcome {
                Ok(_) => report.loaded.push(layer_id),
                Err(e) => report.failed.push((layer_id, e)),
            }
        }

        log::info!(
            "Prefetched {} default layers ({} failed)",
            report.loaded.len(),
            report.failed.len()
        );
        report
    }

    /// Drops every entry and in-flight tracker.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
        self.in_flight.clear();
        self.size_hints.clear();
        log::info!("Layer cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            in_flight: self.in_flight.len(),
            hits: self.hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}
