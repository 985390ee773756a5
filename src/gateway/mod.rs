//! The gateway: one front door tying the cache, governor, dispatcher,
//! fallback orchestrator and warming machinery together.

mod builder;
mod dispatch;

pub use builder::GatewayBuilder;
pub use dispatch::{Dispatch, Dispatcher, DEFAULT_UPSTREAM_TIMEOUT};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::cache::{CacheLayer, CacheStatsReport, CacheStore, FetchedValue, Fill};
use crate::error::Result;
use crate::limits::{
    BudgetAlert, BudgetMonitor, DetectedChange, FallbackOrchestrator, LimitChangeDetector,
    ProviderLimits, QuotaGovernor, WARN_RED, WARN_YELLOW,
};
use crate::types::{
    CacheOptions, FallbackMode, Provider, ProviderRequest, QuotaDecision, WarningLevel,
};
use crate::usage::{UsageCounter, UsageSnapshot};
use crate::warming::{WarmingQueue, WarmingReport, WarmingScheduler};

/// Where a gateway response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    FastCache,
    DurableCache,
    FuzzyCache,
    Upstream,
    Fallback(FallbackMode),
    /// Nothing could serve the request; retry later.
    Miss,
}

impl From<CacheLayer> for ResponseSource {
    fn from(layer: CacheLayer) -> Self {
        match layer {
            CacheLayer::Fast => ResponseSource::FastCache,
            CacheLayer::Durable => ResponseSource::DurableCache,
            CacheLayer::Fuzzy => ResponseSource::FuzzyCache,
        }
    }
}

/// What the gateway hands back for a request.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub payload: Option<Value>,
    pub source: ResponseSource,
    pub fallback_used: bool,
    pub degraded: bool,
    /// Set when the request was denied or ended in a miss: when to retry.
    pub retry_after: Option<Duration>,
    /// The quota decision that shaped this response, when one was made.
    pub decision: Option<QuotaDecision>,
}

/// One row of the per-provider dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderReport {
    pub provider: Provider,
    pub usage: UsageSnapshot,
    pub limits: ProviderLimits,
    pub warning_level: WarningLevel,
    pub daily_percent: f64,
    pub hourly_percent: f64,
    /// Today's spend projected from recorded requests.
    pub estimated_daily_cost_eur: f64,
}

/// Operational snapshot across providers, cache and warming queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardReport {
    pub providers: Vec<ProviderReport>,
    pub cache: CacheStatsReport,
    pub warming: WarmingReport,
}

pub struct Gateway {
    cache: Arc<CacheStore>,
    governor: Arc<QuotaGovernor>,
    counter: Arc<UsageCounter>,
    dispatcher: Arc<Dispatcher>,
    orchestrator: Arc<FallbackOrchestrator>,
    warming_queue: Arc<WarmingQueue>,
    budget_monitor: BudgetMonitor,
    detector: Option<LimitChangeDetector>,
    warming_delay: Option<Duration>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    warming_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        cache: Arc<CacheStore>,
        governor: Arc<QuotaGovernor>,
        counter: Arc<UsageCounter>,
        dispatcher: Arc<Dispatcher>,
        orchestrator: Arc<FallbackOrchestrator>,
        warming_queue: Arc<WarmingQueue>,
        budget_monitor: BudgetMonitor,
        detector: Option<LimitChangeDetector>,
        warming_delay: Option<Duration>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            cache,
            governor,
            counter,
            dispatcher,
            orchestrator,
            warming_queue,
            budget_monitor,
            detector,
            warming_delay,
            shutdown_tx,
            shutdown_rx,
            warming_handle: Mutex::new(None),
        }
    }

    /// Serve one request: cache layers first, then governed upstream
    /// dispatch, then the fallback chain if the provider is blocked or
    /// failing transiently.
    #[instrument(skip(self, request, options), fields(provider = request.provider.as_str(), kind = request.kind.as_str()))]
    pub async fn get(
        &self,
        request: &ProviderRequest,
        options: &CacheOptions,
    ) -> Result<GatewayResponse> {
        let fingerprint = request.fingerprint();
        let decision_slot: Arc<Mutex<Option<QuotaDecision>>> = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&decision_slot);
        let fill = self
            .cache
            .get_or_fetch(&fingerprint, request.kind, options, || async move {
                self.fetch_upstream(request, options, slot).await
            })
            .await?;

        let decision = match decision_slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        Ok(match fill {
            Fill::Hit { entry, layer, .. } => GatewayResponse {
                payload: Some(entry.payload),
                source: layer.into(),
                fallback_used: false,
                degraded: false,
                retry_after: None,
                decision,
            },
            Fill::Fetched(value) => GatewayResponse {
                payload: Some(value.payload),
                source: match value.fallback {
                    Some(mode) => ResponseSource::Fallback(mode),
                    None => ResponseSource::Upstream,
                },
                fallback_used: value.fallback.is_some(),
                degraded: value.degraded,
                retry_after: None,
                decision,
            },
            Fill::Miss => {
                let retry_after = decision.as_ref().and_then(|d| d.retry_after);
                GatewayResponse {
                    payload: None,
                    source: ResponseSource::Miss,
                    fallback_used: true,
                    degraded: false,
                    retry_after,
                    decision,
                }
            }
        })
    }

    /// The fetch path behind a cache miss: governed dispatch, degrading
    /// through the fallback orchestrator on denial or transient failure.
    async fn fetch_upstream(
        &self,
        request: &ProviderRequest,
        options: &CacheOptions,
        decision_slot: Arc<Mutex<Option<QuotaDecision>>>,
    ) -> Result<Option<FetchedValue>> {
        match self.dispatcher.fetch_governed(request).await {
            Ok(Dispatch::Fetched(response)) => Ok(Some(FetchedValue {
                payload: response.payload,
                provider: response.provider,
                confidence: response.confidence,
                fallback: None,
                degraded: false,
            })),
            Ok(Dispatch::Denied(decision)) => {
                let mode = decision
                    .fallback_mode
                    .unwrap_or(FallbackMode::Degraded);
                if let Ok(mut guard) = decision_slot.lock() {
                    *guard = Some(decision);
                }
                let outcome = self.orchestrator.execute(request, options, mode).await?;
                Ok(outcome.payload.map(|payload| FetchedValue {
                    payload,
                    provider: outcome.provider_used.unwrap_or(request.provider),
                    confidence: None,
                    fallback: Some(outcome.mode),
                    degraded: outcome.degraded,
                }))
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(
                    provider = request.provider.as_str(),
                    error = %err,
                    "upstream failed, degrading through fallback"
                );
                let mode = self.governor.block_mode(request.provider);
                let outcome = self.orchestrator.execute(request, options, mode).await?;
                match outcome.payload {
                    Some(payload) => Ok(Some(FetchedValue {
                        payload,
                        provider: outcome.provider_used.unwrap_or(request.provider),
                        confidence: None,
                        fallback: Some(outcome.mode),
                        degraded: outcome.degraded,
                    })),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Quota decision for a prospective request, without dispatching.
    pub fn check_request(&self, provider: Provider) -> QuotaDecision {
        self.governor.check_request(provider)
    }

    /// Record a successful upstream call made outside the gateway.
    pub fn track_success(&self, provider: Provider, endpoint: &str, response_ms: u64) {
        tracing::debug!(provider = provider.as_str(), endpoint, response_ms, "tracked");
        self.counter.record(provider, true, response_ms);
    }

    /// Record a failed upstream call made outside the gateway.
    pub fn track_failure(&self, provider: Provider, endpoint: &str, response_ms: u64) {
        tracing::debug!(provider = provider.as_str(), endpoint, response_ms, "tracked failure");
        self.counter.record(provider, false, response_ms);
    }

    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<u64> {
        self.cache.invalidate_by_tag(tag).await
    }

    pub async fn sweep_expired(&self) -> Result<u64> {
        self.cache.sweep_expired().await
    }

    pub fn governor(&self) -> &Arc<QuotaGovernor> {
        &self.governor
    }

    pub fn warming_queue(&self) -> &Arc<WarmingQueue> {
        &self.warming_queue
    }

    /// Check budgets now; applies emergency limits when warranted.
    pub fn check_budgets(&self) -> Result<Vec<BudgetAlert>> {
        self.budget_monitor.check()
    }

    /// Poll quota probes for published limit changes, if any are wired in.
    pub async fn detect_limit_changes(&self) -> Result<Vec<DetectedChange>> {
        match &self.detector {
            Some(detector) => detector.run().await,
            None => Ok(Vec::new()),
        }
    }

    /// Process one batch of warming jobs inline.
    pub async fn run_warming(&self, batch_size: usize) -> usize {
        let scheduler = WarmingScheduler::new(
            Arc::clone(&self.warming_queue),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.cache),
            self.warming_delay,
            self.shutdown_rx.clone(),
        );
        scheduler.run_batch(batch_size).await
    }

    /// Start the background warming loop. A second call replaces nothing;
    /// the first loop keeps running.
    pub fn spawn_warming(&self, interval: Duration, batch_size: usize) {
        let mut handle = match self.warming_handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if handle.is_some() {
            return;
        }
        let scheduler = WarmingScheduler::new(
            Arc::clone(&self.warming_queue),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.cache),
            self.warming_delay,
            self.shutdown_rx.clone(),
        );
        *handle = Some(tokio::spawn(scheduler.run_loop(interval, batch_size)));
    }

    /// Signal background tasks to stop and wait for the warming loop.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = match self.warming_handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Operational snapshot for dashboards and health endpoints.
    pub fn dashboard(&self) -> DashboardReport {
        let providers = Provider::ALL
            .iter()
            .map(|&provider| {
                let usage = self.counter.usage(provider);
                let limits = self.governor.limits(provider);
                let daily_percent = usage.daily as f64 / f64::from(limits.daily) * 100.0;
                let hourly_percent = usage.hourly as f64 / f64::from(limits.hourly) * 100.0;
                let binding = (daily_percent.max(hourly_percent)) / 100.0;
                let warning_level = if binding >= crate::limits::BLOCK_THRESHOLD {
                    WarningLevel::Blocked
                } else if binding >= WARN_RED {
                    WarningLevel::Red
                } else if binding >= WARN_YELLOW {
                    WarningLevel::Yellow
                } else {
                    WarningLevel::None
                };
                ProviderReport {
                    provider,
                    limits,
                    warning_level,
                    daily_percent,
                    hourly_percent,
                    estimated_daily_cost_eur: usage.daily as f64 * limits.cost_per_request,
                    usage,
                }
            })
            .collect();

        DashboardReport {
            providers,
            cache: self.cache.stats(),
            warming: self.warming_queue.report(),
        }
    }
}
