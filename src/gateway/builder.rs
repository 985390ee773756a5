//! Gateway construction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStore, CacheStoreConfig, FuzzyConfig};
use crate::error::{GeogateError, Result};
use crate::gateway::{Dispatcher, Gateway};
use crate::limits::{
    BudgetMonitor, FallbackOrchestrator, LimitChangeDetector, LimitsConfig, QuotaGovernor,
    QuotaProbe,
};
use crate::store::MemoryStore;
use crate::traits::{AlertSink, AuditLog, DurableStore, ProviderAdapter, TracingAlertSink, TracingAuditLog};
use crate::types::Provider;
use crate::usage::UsageCounter;
use crate::warming::WarmingQueue;

/// Builder for [`Gateway`]. At least one provider adapter is required;
/// everything else has defaults.
pub struct GatewayBuilder {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
    durable_store: Option<Arc<dyn DurableStore>>,
    limits: LimitsConfig,
    alert_sink: Option<Arc<dyn AlertSink>>,
    audit_log: Option<Arc<dyn AuditLog>>,
    fuzzy: FuzzyConfig,
    fast_capacity: u64,
    upstream_timeout: Option<Duration>,
    warming_delay: Option<Duration>,
    probes: Vec<Arc<dyn QuotaProbe>>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            durable_store: None,
            limits: LimitsConfig::default(),
            alert_sink: None,
            audit_log: None,
            fuzzy: FuzzyConfig::default(),
            fast_capacity: 10_000,
            upstream_timeout: None,
            warming_delay: None,
            probes: Vec::new(),
        }
    }

    /// Register an adapter. The provider it serves comes from the adapter
    /// itself.
    pub fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    /// Durable second-layer store. Defaults to the in-process
    /// [`MemoryStore`].
    pub fn durable_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.durable_store = Some(store);
        self
    }

    pub fn limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    pub fn audit_log(mut self, log: Arc<dyn AuditLog>) -> Self {
        self.audit_log = Some(log);
        self
    }

    pub fn fuzzy(mut self, fuzzy: FuzzyConfig) -> Self {
        self.fuzzy = fuzzy;
        self
    }

    pub fn fast_capacity(mut self, capacity: u64) -> Self {
        self.fast_capacity = capacity;
        self
    }

    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = Some(timeout);
        self
    }

    /// Delay between warming jobs within a batch. Defaults to 500ms.
    pub fn warming_delay(mut self, delay: Duration) -> Self {
        self.warming_delay = Some(delay);
        self
    }

    /// Add a published-limit probe; any probe enables the change detector.
    pub fn quota_probe(mut self, probe: Arc<dyn QuotaProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn build(self) -> Result<Gateway> {
        if self.adapters.is_empty() {
            return Err(GeogateError::Configuration(
                "at least one provider adapter is required".to_string(),
            ));
        }
        self.limits.validate()?;

        let alerts = self
            .alert_sink
            .unwrap_or_else(|| Arc::new(TracingAlertSink) as Arc<dyn AlertSink>);
        let audit = self
            .audit_log
            .unwrap_or_else(|| Arc::new(TracingAuditLog) as Arc<dyn AuditLog>);
        let durable = self
            .durable_store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn DurableStore>);

        let counter = Arc::new(UsageCounter::new());
        let governor = Arc::new(QuotaGovernor::new(
            Arc::clone(&counter),
            self.limits,
            Arc::clone(&alerts),
            audit,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&governor),
            Arc::clone(&counter),
            self.adapters,
            self.upstream_timeout,
        ));
        let warming_queue = Arc::new(WarmingQueue::new());
        let cache = Arc::new(CacheStore::new(
            durable,
            Arc::clone(&warming_queue),
            CacheStoreConfig {
                fast_capacity: self.fast_capacity,
                fuzzy: self.fuzzy,
                ..CacheStoreConfig::default()
            },
        ));
        let orchestrator = Arc::new(FallbackOrchestrator::new(
            Arc::clone(&governor),
            Arc::clone(&cache),
            Arc::clone(&dispatcher),
        ));
        let budget_monitor = BudgetMonitor::new(
            Arc::clone(&governor),
            Arc::clone(&counter),
            Arc::clone(&alerts),
        );
        let detector = if self.probes.is_empty() {
            None
        } else {
            Some(LimitChangeDetector::new(
                Arc::clone(&governor),
                self.probes,
                Arc::clone(&alerts),
            ))
        };

        Ok(Gateway::assemble(
            cache,
            governor,
            counter,
            dispatcher,
            orchestrator,
            warming_queue,
            budget_monitor,
            detector,
            self.warming_delay,
        ))
    }
}
