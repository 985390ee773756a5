//! Multi-layer adaptive response cache.
//!
//! Layer 1 is an in-process moka cache for hot entries, layer 2 a durable
//! store that survives restarts, layer 3 a fuzzy matcher over popular
//! geocoding entries. Lookups fall through the layers in that order;
//! durable and fuzzy hits are promoted into the fast layer.

mod entry;
mod fuzzy;
mod predict;
mod singleflight;
mod ttl;

pub use entry::{invalidation_tags, CacheEntry, EntryMetadata};
pub use fuzzy::{normalize_address, similarity, FuzzyConfig, FuzzyMatch};
pub use predict::prediction_score;
pub use singleflight::Singleflight;
pub use ttl::{calculate_optimal_ttl, LocalMoment};

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::error::Result;
use crate::telemetry;
use crate::traits::DurableStore;
use crate::types::{CacheKind, CacheOptions, FallbackMode, Provider};
use crate::warming::WarmingQueue;

/// Which layer served a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLayer {
    Fast,
    Durable,
    Fuzzy,
}

impl CacheLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLayer::Fast => "fast",
            CacheLayer::Durable => "durable",
            CacheLayer::Fuzzy => "fuzzy",
        }
    }
}

/// Result of a pure cache lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    Hit {
        entry: CacheEntry,
        layer: CacheLayer,
        /// Set for fuzzy hits only.
        similarity: Option<f64>,
    },
    Miss,
}

/// A value produced by the upstream fetch path of [`CacheStore::get_or_fetch`].
#[derive(Debug, Clone)]
pub struct FetchedValue {
    pub payload: Value,
    pub provider: Provider,
    pub confidence: Option<f64>,
    /// Set when a fallback strategy produced the value.
    pub fallback: Option<FallbackMode>,
    /// Degraded synthetic answers are returned but never cached.
    pub degraded: bool,
}

/// Outcome of a read-through cache access.
#[derive(Debug, Clone)]
pub enum Fill {
    Hit {
        entry: CacheEntry,
        layer: CacheLayer,
        similarity: Option<f64>,
    },
    Fetched(FetchedValue),
    Miss,
}

/// Tunables for the cache store.
#[derive(Debug, Clone)]
pub struct CacheStoreConfig {
    /// Max entries held in the fast layer.
    pub fast_capacity: u64,
    /// Upper bound on fast-layer residency; entries also carry their own
    /// `expires_at` which is checked on read.
    pub fast_ttl_cap: Duration,
    pub fuzzy: FuzzyConfig,
}

impl Default for CacheStoreConfig {
    fn default() -> Self {
        Self {
            fast_capacity: 10_000,
            fast_ttl_cap: Duration::from_secs(3_600),
            fuzzy: FuzzyConfig::default(),
        }
    }
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    fuzzy_hits: AtomicU64,
    /// EUR saved, stored in micro-euros so an atomic integer suffices.
    cost_saved_micros: AtomicU64,
}

/// Aggregated cache statistics for the dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub hits: u64,
    pub misses: u64,
    pub fuzzy_hits: u64,
    pub hit_rate_percent: f64,
    /// Upstream calls avoided; every hit is one saved call.
    pub api_calls_saved: u64,
    pub cost_saved_eur: f64,
}

pub struct CacheStore {
    fast: moka::sync::Cache<String, CacheEntry>,
    durable: Arc<dyn DurableStore>,
    warming: Arc<WarmingQueue>,
    flight: Singleflight,
    config: CacheStoreConfig,
    stats: CacheStats,
}

impl CacheStore {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        warming: Arc<WarmingQueue>,
        config: CacheStoreConfig,
    ) -> Self {
        let fast = moka::sync::Cache::builder()
            .max_capacity(config.fast_capacity)
            .time_to_live(config.fast_ttl_cap)
            .build();
        Self {
            fast,
            durable,
            warming,
            flight: Singleflight::new(),
            config,
            stats: CacheStats::default(),
        }
    }

    /// Look `fingerprint` up across all layers without fetching.
    #[instrument(skip(self, options), fields(kind = kind.as_str()))]
    pub async fn lookup(
        &self,
        fingerprint: &str,
        kind: CacheKind,
        options: &CacheOptions,
    ) -> Result<Lookup> {
        self.lookup_inner(fingerprint, kind, options, true).await
    }

    async fn lookup_inner(
        &self,
        fingerprint: &str,
        kind: CacheKind,
        options: &CacheOptions,
        record_miss: bool,
    ) -> Result<Lookup> {
        let now = Utc::now();

        if let Some(entry) = self.fast.get(fingerprint) {
            if entry.is_expired(now) {
                self.fast.invalidate(fingerprint);
            } else {
                // Popularity lives in the durable layer; fast hits count
                // toward it too, or a hot entry would never enter the
                // fuzzy candidate pool.
                if let Err(err) = self.durable.record_hit(fingerprint, now).await {
                    tracing::debug!(error = %err, "hit counter update failed");
                }
                let mut entry = entry;
                entry.hit_count += 1;
                entry.last_accessed_at = Some(now);
                self.fast.insert(fingerprint.to_string(), entry.clone());
                self.note_hit(&entry, CacheLayer::Fast);
                return Ok(Lookup::Hit {
                    entry,
                    layer: CacheLayer::Fast,
                    similarity: None,
                });
            }
        }

        match self.durable.get(fingerprint, kind).await {
            Ok(Some(mut entry)) if !entry.is_expired(now) => {
                if let Err(err) = self.durable.record_hit(fingerprint, now).await {
                    tracing::debug!(error = %err, "hit counter update failed");
                }
                entry.hit_count += 1;
                entry.last_accessed_at = Some(now);
                self.fast.insert(fingerprint.to_string(), entry.clone());
                self.note_hit(&entry, CacheLayer::Durable);
                return Ok(Lookup::Hit {
                    entry,
                    layer: CacheLayer::Durable,
                    similarity: None,
                });
            }
            Ok(_) => {}
            Err(err) => {
                // A broken durable layer degrades to the other layers.
                tracing::warn!(error = %err, "durable cache read failed");
            }
        }

        if kind == CacheKind::Geocoding {
            if let Some(input) = options.original_input.as_deref() {
                match fuzzy::find_similar(self.durable.as_ref(), &self.config.fuzzy, input, now)
                    .await
                {
                    Ok(Some(found)) => {
                        // Promote the matched payload under the requested
                        // fingerprint so the next lookup is exact.
                        let mut promoted = found.entry.clone();
                        promoted.fingerprint = fingerprint.to_string();
                        self.fast.insert(fingerprint.to_string(), promoted);
                        self.stats.fuzzy_hits.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!(telemetry::FUZZY_MATCHES_TOTAL).increment(1);
                        self.note_hit(&found.entry, CacheLayer::Fuzzy);
                        return Ok(Lookup::Hit {
                            entry: found.entry,
                            layer: CacheLayer::Fuzzy,
                            similarity: Some(found.similarity),
                        });
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "fuzzy lookup failed");
                    }
                }
            }
        }

        if record_miss {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "kind" => kind.as_str()).increment(1);
        }
        Ok(Lookup::Miss)
    }

    /// Read-through access with request coalescing: on a miss, exactly one
    /// concurrent caller runs `fetch`; the rest wait and re-read.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        fingerprint: &str,
        kind: CacheKind,
        options: &CacheOptions,
        fetch: F,
    ) -> Result<Fill>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<FetchedValue>>>,
    {
        if let Lookup::Hit {
            entry,
            layer,
            similarity,
        } = self.lookup(fingerprint, kind, options).await?
        {
            return Ok(Fill::Hit {
                entry,
                layer,
                similarity,
            });
        }

        let _guard = self.flight.acquire(fingerprint).await;

        // Another flight may have filled the entry while we waited; this
        // re-check is not a second logical miss.
        if let Lookup::Hit {
            entry,
            layer,
            similarity,
        } = self
            .lookup_inner(fingerprint, kind, options, false)
            .await?
        {
            return Ok(Fill::Hit {
                entry,
                layer,
                similarity,
            });
        }

        match fetch().await? {
            Some(value) => {
                if !value.degraded {
                    self.insert(
                        fingerprint,
                        kind,
                        value.payload.clone(),
                        options,
                        value.provider,
                        value.confidence,
                    )
                    .await?;
                }
                Ok(Fill::Fetched(value))
            }
            None => Ok(Fill::Miss),
        }
    }

    /// Store a fresh upstream response in both layers and schedule any
    /// derivative warming it implies.
    pub async fn insert(
        &self,
        fingerprint: &str,
        kind: CacheKind,
        payload: Value,
        options: &CacheOptions,
        provider: Provider,
        confidence: Option<f64>,
    ) -> Result<()> {
        self.insert_at(
            fingerprint,
            kind,
            payload,
            options,
            provider,
            confidence,
            Utc::now(),
            LocalMoment::now(),
        )
        .await
    }

    /// Insert with explicit time context, for deterministic tests.
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_at(
        &self,
        fingerprint: &str,
        kind: CacheKind,
        payload: Value,
        options: &CacheOptions,
        provider: Provider,
        confidence: Option<f64>,
        now: DateTime<Utc>,
        moment: LocalMoment,
    ) -> Result<()> {
        let ttl = calculate_optimal_ttl(kind, confidence, options, moment);

        // Preserve popularity counters across refreshes of the same entry.
        let previous = match self.durable.get(fingerprint, kind).await {
            Ok(existing) => existing,
            Err(err) => {
                tracing::debug!(error = %err, "previous entry read failed");
                None
            }
        };
        let historical_hits = previous.as_ref().map_or(0, |e| e.hit_count);
        // A refresh of an already-expired entry means a reader missed it
        // before this write.
        let miss_count = previous.as_ref().map_or(0, |e| {
            if e.is_expired(now) {
                e.miss_count + 1
            } else {
                e.miss_count
            }
        });

        let payload_bytes = payload.to_string().len();
        let normalized_input = options
            .original_input
            .as_deref()
            .map(fuzzy::normalize_address);
        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            kind,
            payload,
            metadata: EntryMetadata {
                provider,
                confidence,
                original_input: options.original_input.clone(),
                normalized_input,
                payload_bytes,
                api_cost: kind.api_cost(),
            },
            ttl_seconds: ttl.as_secs(),
            expires_at: now + chrono::Duration::seconds(ttl.as_secs() as i64),
            hit_count: historical_hits,
            miss_count,
            prediction_score: prediction_score(kind, historical_hits, moment),
            invalidation_tags: invalidation_tags(kind, provider, options),
            created_at: now,
            last_accessed_at: None,
        };

        // A durable write failure must not lose the response for this
        // process lifetime; keep the fast-layer copy and move on.
        if let Err(err) = self.durable.upsert(entry.clone()).await {
            tracing::warn!(error = %err, fingerprint, "durable cache write failed");
        }
        self.fast.insert(fingerprint.to_string(), entry.clone());

        self.schedule_derivatives(&entry, options);
        Ok(())
    }

    /// Queue warming work implied by a fresh entry: traffic for each route
    /// segment, the reverse lookup for a geocoding result.
    fn schedule_derivatives(&self, entry: &CacheEntry, options: &CacheOptions) {
        match entry.kind {
            CacheKind::Route => {
                let Some(segments) = entry.payload.get("segments").and_then(Value::as_array)
                else {
                    return;
                };
                for segment in segments {
                    let (Some(from), Some(to)) = (segment.get("from"), segment.get("to")) else {
                        continue;
                    };
                    let request = crate::types::ProviderRequest::new(
                        entry.metadata.provider,
                        CacheKind::Traffic,
                        "/traffic",
                        serde_json::json!({"from": from, "to": to}),
                    );
                    self.warming.enqueue(request, CacheOptions::default(), 7);
                }
            }
            CacheKind::Geocoding => {
                let location = entry
                    .payload
                    .get("location")
                    .or_else(|| entry.payload.get("geometry"));
                let Some(location) = location else { return };
                let (Some(lat), Some(lng)) = (
                    location.get("lat").and_then(Value::as_f64),
                    location.get("lng").and_then(Value::as_f64),
                ) else {
                    return;
                };
                let request = crate::types::ProviderRequest::new(
                    entry.metadata.provider,
                    CacheKind::Geocoding,
                    "/geocode/reverse",
                    serde_json::json!({"lat": lat, "lng": lng, "reverse": true}),
                );
                let mut derived = options.clone();
                derived.original_input = None;
                self.warming.enqueue(request, derived, 8);
            }
            _ => {}
        }
    }

    /// Drop every entry carrying `tag` from both layers. Returns how many
    /// durable entries were removed.
    #[instrument(skip(self))]
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<u64> {
        let removed = self.durable.delete_by_tag(tag).await?;

        let stale: Vec<String> = self
            .fast
            .iter()
            .filter(|(_, entry)| entry.invalidation_tags.iter().any(|t| t == tag))
            .map(|(key, _)| key.as_ref().clone())
            .collect();
        for key in &stale {
            self.fast.invalidate(key);
        }
        tracing::info!(tag, removed, fast_removed = stale.len(), "cache invalidated");
        Ok(removed)
    }

    /// Remove expired entries from the durable layer.
    pub async fn sweep_expired(&self) -> Result<u64> {
        self.durable.sweep_expired(Utc::now()).await
    }

    fn note_hit(&self, entry: &CacheEntry, layer: CacheLayer) {
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        let micros = (entry.metadata.api_cost * 1_000_000.0) as u64;
        self.stats
            .cost_saved_micros
            .fetch_add(micros, Ordering::Relaxed);
        metrics::counter!(
            telemetry::CACHE_HITS_TOTAL,
            "kind" => entry.kind.as_str(),
            "layer" => layer.as_str(),
        )
        .increment(1);
    }

    pub fn stats(&self) -> CacheStatsReport {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStatsReport {
            hits,
            misses,
            fuzzy_hits: self.stats.fuzzy_hits.load(Ordering::Relaxed),
            hit_rate_percent: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64 * 100.0
            },
            api_calls_saved: hits,
            cost_saved_eur: self.stats.cost_saved_micros.load(Ordering::Relaxed) as f64
                / 1_000_000.0,
        }
    }

    pub fn fuzzy_config(&self) -> &FuzzyConfig {
        &self.config.fuzzy
    }
}
