//! Extension traits: provider adapters, the durable store, alert and
//! audit sinks.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::cache::CacheEntry;
use crate::error::Result;
use crate::types::{CacheKind, Provider, ProviderRequest, ProviderResponse};

/// Adapter for one upstream provider.
///
/// Implementations own transport details (base URL, auth, response
/// shaping). Geogate only sees `ProviderResponse` payloads.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which provider this adapter speaks to.
    fn provider(&self) -> Provider;

    /// Perform the upstream call. Return `Err` for transport or API
    /// failures; never block on quota here, the dispatcher handles that.
    async fn fetch(&self, request: &ProviderRequest) -> Result<ProviderResponse>;
}

/// Durable second-layer cache storage.
///
/// The in-memory fast layer fronts this store. Implementations are
/// expected to survive process restarts (a database table, typically);
/// [`MemoryStore`](crate::store::MemoryStore) is the in-process default.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, fingerprint: &str, kind: CacheKind) -> Result<Option<CacheEntry>>;

    /// Insert or replace the entry stored under its fingerprint.
    async fn upsert(&self, entry: CacheEntry) -> Result<()>;

    async fn delete(&self, fingerprint: &str) -> Result<()>;

    /// Delete every entry carrying `tag`; returns how many were removed.
    async fn delete_by_tag(&self, tag: &str) -> Result<u64>;

    /// Bump the hit counter and last-access time for an entry.
    async fn record_hit(&self, fingerprint: &str, at: DateTime<Utc>) -> Result<()>;

    /// The most-hit unexpired entries of `kind`, best first. Feeds the
    /// fuzzy-match candidate pool.
    async fn top_by_hits(
        &self,
        kind: CacheKind,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<CacheEntry>>;

    /// Remove expired entries; returns how many were removed.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Category of an operational alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    QuotaWarning,
    QuotaBlocked,
    LimitChangeDetected,
    LimitsAutoUpdated,
    BudgetWarning,
    BudgetExceeded,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::QuotaWarning => "quota_warning",
            AlertKind::QuotaBlocked => "quota_blocked",
            AlertKind::LimitChangeDetected => "limit_change_detected",
            AlertKind::LimitsAutoUpdated => "limits_auto_updated",
            AlertKind::BudgetWarning => "budget_warning",
            AlertKind::BudgetExceeded => "budget_exceeded",
        }
    }
}

/// An operational alert emitted by the governor, detector or budget
/// monitor.
#[derive(Debug, Clone)]
pub struct Alert {
    pub kind: AlertKind,
    pub provider: Provider,
    pub message: String,
    /// Structured context (usage ratios, proposed limits, ...).
    pub payload: Value,
}

/// Receives alerts. Must be fast and infallible; alerting never blocks
/// the request path.
pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: Alert);
}

/// Default sink: structured log lines via `tracing`.
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn notify(&self, alert: Alert) {
        tracing::warn!(
            kind = alert.kind.as_str(),
            provider = alert.provider.as_str(),
            payload = %alert.payload,
            "{}",
            alert.message
        );
    }
}

/// Test sink that captures alerts in memory.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Alert> {
        match self.alerts.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn snapshot(&self) -> Vec<Alert> {
        match self.alerts.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AlertSink for MemoryAlertSink {
    fn notify(&self, alert: Alert) {
        match self.alerts.lock() {
            Ok(mut guard) => guard.push(alert),
            Err(poisoned) => poisoned.into_inner().push(alert),
        }
    }
}

/// One auditable limit mutation.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// What happened, e.g. `limits_updated`.
    pub action: String,
    pub provider: Provider,
    /// Who did it: an operator name, `limit-change-detector` or
    /// `budget-monitor`.
    pub actor: String,
    pub old_values: Value,
    pub new_values: Value,
    pub at: DateTime<Utc>,
}

/// Append-only audit trail for limit changes.
pub trait AuditLog: Send + Sync {
    fn append(&self, record: AuditRecord);
}

/// Default audit log: structured log lines via `tracing`.
#[derive(Debug, Default)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn append(&self, record: AuditRecord) {
        tracing::info!(
            action = %record.action,
            provider = record.provider.as_str(),
            actor = %record.actor,
            old = %record.old_values,
            new = %record.new_values,
            "limit audit"
        );
    }
}

/// Test audit log that captures records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<AuditRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, record: AuditRecord) {
        match self.records.lock() {
            Ok(mut guard) => guard.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}
