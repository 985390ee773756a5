//! Monthly budget monitoring.
//!
//! Projects the month's spend from recorded usage and the per-request
//! cost. Nearing the budget triggers a warning; crossing the emergency
//! threshold swaps in the provider's crisis limits once per month.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use serde_json::json;
use tracing::instrument;

use crate::error::Result;
use crate::limits::config::ProviderLimits;
use crate::limits::QuotaGovernor;
use crate::traits::{Alert, AlertKind, AlertSink};
use crate::types::Provider;
use crate::usage::UsageCounter;

/// Fraction of the monthly budget at which emergency limits apply.
pub const EMERGENCY_THRESHOLD: f64 = 0.90;
/// Fraction of the monthly budget at which a warning fires.
pub const WARNING_THRESHOLD: f64 = 0.75;

const MONITOR_ACTOR: &str = "budget-monitor";

/// Severity of a budget finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetSeverity {
    Warning,
    Emergency,
}

#[derive(Debug, Clone)]
pub struct BudgetAlert {
    pub provider: Provider,
    pub severity: BudgetSeverity,
    pub spent_eur: f64,
    pub budget_eur: f64,
    /// Whether emergency limits were applied by this check.
    pub limits_applied: bool,
}

pub struct BudgetMonitor {
    governor: Arc<QuotaGovernor>,
    counter: Arc<UsageCounter>,
    alerts: Arc<dyn AlertSink>,
    /// (provider, "YYYY-MM") months that already got emergency limits.
    applied_months: Mutex<HashSet<(Provider, String)>>,
}

impl BudgetMonitor {
    pub fn new(
        governor: Arc<QuotaGovernor>,
        counter: Arc<UsageCounter>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            governor,
            counter,
            alerts,
            applied_months: Mutex::new(HashSet::new()),
        }
    }

    /// Check every provider's spend against its budget.
    #[instrument(skip(self))]
    pub fn check(&self) -> Result<Vec<BudgetAlert>> {
        self.check_at(Local::now())
    }

    /// Check at an explicit timestamp, for deterministic tests.
    pub fn check_at(&self, now: DateTime<Local>) -> Result<Vec<BudgetAlert>> {
        let mut findings = Vec::new();
        for provider in Provider::ALL {
            let budget = self.governor.budget(provider);
            if budget.monthly <= 0.0 {
                continue;
            }
            let limits = self.governor.limits(provider);
            let requests = self.counter.monthly_requests(provider, now);
            let spent = requests as f64 * limits.cost_per_request;
            let ratio = spent / budget.monthly;

            if ratio >= EMERGENCY_THRESHOLD {
                let month = now.format("%Y-%m").to_string();
                let applied = self.apply_emergency_limits(provider, &month, limits, &budget)?;
                self.alerts.notify(Alert {
                    kind: AlertKind::BudgetExceeded,
                    provider,
                    message: format!(
                        "{provider}: {spent:.2} EUR of {budget_eur:.2} EUR monthly budget spent",
                        budget_eur = budget.monthly
                    ),
                    payload: json!({
                        "spent_eur": spent,
                        "budget_eur": budget.monthly,
                        "emergency_limits_applied": applied,
                    }),
                });
                findings.push(BudgetAlert {
                    provider,
                    severity: BudgetSeverity::Emergency,
                    spent_eur: spent,
                    budget_eur: budget.monthly,
                    limits_applied: applied,
                });
            } else if ratio >= WARNING_THRESHOLD {
                self.alerts.notify(Alert {
                    kind: AlertKind::BudgetWarning,
                    provider,
                    message: format!(
                        "{provider}: {percent:.0}% of monthly budget spent",
                        percent = ratio * 100.0
                    ),
                    payload: json!({
                        "spent_eur": spent,
                        "budget_eur": budget.monthly,
                    }),
                });
                findings.push(BudgetAlert {
                    provider,
                    severity: BudgetSeverity::Warning,
                    spent_eur: spent,
                    budget_eur: budget.monthly,
                    limits_applied: false,
                });
            }
        }
        Ok(findings)
    }

    /// Swap in the crisis limits, at most once per provider per month.
    fn apply_emergency_limits(
        &self,
        provider: Provider,
        month: &str,
        current: ProviderLimits,
        budget: &crate::limits::config::ProviderBudget,
    ) -> Result<bool> {
        {
            let mut applied = match self.applied_months.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !applied.insert((provider, month.to_string())) {
                return Ok(false);
            }
        }
        let emergency = ProviderLimits {
            per_second: current.per_second,
            hourly: budget.emergency_hourly.max(1),
            daily: budget.emergency_daily.max(1),
            cost_per_request: current.cost_per_request,
        };
        self.governor
            .update_limits(provider, emergency, MONITOR_ACTOR)?;
        tracing::warn!(
            provider = provider.as_str(),
            daily = emergency.daily,
            hourly = emergency.hourly,
            "emergency limits applied"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::config::LimitsConfig;
    use crate::traits::{AlertSink, MemoryAlertSink, MemoryAuditLog};
    use chrono::TimeZone;

    fn monitor_with(
        counter: Arc<UsageCounter>,
    ) -> (BudgetMonitor, Arc<QuotaGovernor>, Arc<MemoryAlertSink>) {
        let alerts = Arc::new(MemoryAlertSink::new());
        let governor = Arc::new(QuotaGovernor::new(
            Arc::clone(&counter),
            LimitsConfig::default(),
            Arc::clone(&alerts) as Arc<dyn AlertSink>,
            Arc::new(MemoryAuditLog::new()),
        ));
        let monitor = BudgetMonitor::new(
            Arc::clone(&governor),
            counter,
            Arc::clone(&alerts) as Arc<dyn AlertSink>,
        );
        (monitor, governor, alerts)
    }

    fn seed_month(counter: &UsageCounter, provider: Provider, requests: u32) {
        // Spread across days to stay clear of daily windows in other tests.
        let mut remaining = requests;
        let mut day = 1;
        while remaining > 0 && day <= 28 {
            let chunk = remaining.min(2_000);
            for i in 0..chunk {
                let at = Local
                    .with_ymd_and_hms(2026, 8, day, (i / 3600) % 24, (i / 60) % 60, i % 60)
                    .unwrap();
                counter.record_at(provider, true, 10, at);
            }
            remaining -= chunk;
            day += 1;
        }
    }

    fn end_of_month() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap()
    }

    #[test]
    fn spend_under_warning_threshold_is_quiet() {
        let counter = Arc::new(UsageCounter::new());
        let (monitor, _, alerts) = monitor_with(Arc::clone(&counter));
        // 20k requests * 0.005 = 100 EUR of a 200 EUR budget.
        seed_month(&counter, Provider::GoogleMaps, 20_000);

        let findings = monitor.check_at(end_of_month()).unwrap();
        assert!(findings.is_empty());
        assert!(alerts.snapshot().is_empty());
    }

    #[test]
    fn warning_fires_at_75_percent() {
        let counter = Arc::new(UsageCounter::new());
        let (monitor, governor, _) = monitor_with(Arc::clone(&counter));
        // 32k requests * 0.005 = 160 EUR = 80% of 200 EUR.
        seed_month(&counter, Provider::GoogleMaps, 32_000);

        let findings = monitor.check_at(end_of_month()).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, BudgetSeverity::Warning);
        // Warning does not touch limits.
        assert_eq!(governor.limits(Provider::GoogleMaps).daily, 25_000);
    }

    #[test]
    fn emergency_limits_apply_once_per_month() {
        let counter = Arc::new(UsageCounter::new());
        let (monitor, governor, alerts) = monitor_with(Arc::clone(&counter));
        // 38k requests * 0.005 = 190 EUR = 95% of 200 EUR.
        seed_month(&counter, Provider::GoogleMaps, 38_000);

        let first = monitor.check_at(end_of_month()).unwrap();
        assert_eq!(first[0].severity, BudgetSeverity::Emergency);
        assert!(first[0].limits_applied);
        assert_eq!(governor.limits(Provider::GoogleMaps).daily, 1_000);
        assert_eq!(governor.limits(Provider::GoogleMaps).hourly, 100);

        let second = monitor.check_at(end_of_month()).unwrap();
        assert!(!second[0].limits_applied);
        assert!(alerts
            .snapshot()
            .iter()
            .filter(|a| a.kind == AlertKind::BudgetExceeded)
            .count()
            >= 2);
    }

    #[test]
    fn zero_budget_providers_are_skipped() {
        let counter = Arc::new(UsageCounter::new());
        let (monitor, _, _) = monitor_with(Arc::clone(&counter));
        seed_month(&counter, Provider::Nominatim, 50_000);

        let findings = monitor.check_at(end_of_month()).unwrap();
        assert!(findings.is_empty());
    }
}
