//! Quota governor: decides whether an upstream request may proceed.
//!
//! Decisions are pure functions of the usage snapshot and the configured
//! limits; side effects (alerts, dedup bookkeeping) live in
//! [`QuotaGovernor::note_warning`] so the decision path stays testable at
//! fixed timestamps.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde_json::json;
use tracing::instrument;

use crate::error::Result;
use crate::limits::config::{LimitsConfig, ProviderLimits};
use crate::telemetry;
use crate::traits::{Alert, AlertKind, AlertSink, AuditLog, AuditRecord};
use crate::types::{
    FallbackMode, FallbackTarget, Provider, QuotaDecision, RecommendedAction, WarningLevel,
};
use crate::usage::UsageCounter;

/// Usage ratio at which a yellow warning fires.
pub const WARN_YELLOW: f64 = 0.80;
/// Usage ratio at which a red warning fires.
pub const WARN_RED: f64 = 0.90;
/// Usage ratio at which requests are blocked.
pub const BLOCK_THRESHOLD: f64 = 0.95;

/// Minimum gap between repeated alerts for the same provider and level.
const WARNING_DEDUP_SECS: i64 = 3_600;

pub struct QuotaGovernor {
    counter: Arc<UsageCounter>,
    config: RwLock<LimitsConfig>,
    alerts: Arc<dyn AlertSink>,
    audit: Arc<dyn AuditLog>,
    recent_warnings: Mutex<HashMap<(Provider, WarningLevel), DateTime<Utc>>>,
}

impl QuotaGovernor {
    pub fn new(
        counter: Arc<UsageCounter>,
        config: LimitsConfig,
        alerts: Arc<dyn AlertSink>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            counter,
            config: RwLock::new(config),
            alerts,
            audit,
            recent_warnings: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether one request to `provider` may go upstream right now.
    #[instrument(skip(self))]
    pub fn check_request(&self, provider: Provider) -> QuotaDecision {
        self.check_request_at(provider, Local::now())
    }

    /// Decision at an explicit timestamp. Pure: no alerts, no metrics.
    pub fn check_request_at(&self, provider: Provider, now: DateTime<Local>) -> QuotaDecision {
        let limits = self.limits(provider);
        let usage = self.counter.usage_at(provider, now);

        let daily_ratio = usage.daily as f64 / f64::from(limits.daily);
        let hourly_ratio = usage.hourly as f64 / f64::from(limits.hourly);

        // Per-second enforcement first: the window is too small for
        // graduated warnings, it is a hard gate. Providers with a 1 rps
        // policy also enforce a full second of spacing between requests.
        let per_second_exceeded = usage.per_second >= u64::from(limits.per_second)
            || (limits.per_second == 1
                && usage
                    .seconds_since_last_request
                    .is_some_and(|gap| gap < 1.0));
        if per_second_exceeded {
            return QuotaDecision {
                provider,
                allowed: false,
                warning_level: WarningLevel::Blocked,
                recommended_action: RecommendedAction::Fallback,
                fallback_mode: Some(self.block_mode(provider)),
                retry_after: Some(Duration::from_secs(1)),
                message: Some(format!(
                    "{provider}: per-second limit of {} reached",
                    limits.per_second
                )),
                usage,
            };
        }

        let binding = daily_ratio.max(hourly_ratio);
        if binding >= BLOCK_THRESHOLD {
            let retry_after = if daily_ratio >= hourly_ratio {
                UsageCounter::seconds_to_next_day(now)
            } else {
                UsageCounter::seconds_to_next_hour(now)
            };
            let window = if daily_ratio >= hourly_ratio {
                "daily"
            } else {
                "hourly"
            };
            return QuotaDecision {
                provider,
                allowed: false,
                warning_level: WarningLevel::Blocked,
                recommended_action: RecommendedAction::Fallback,
                fallback_mode: Some(self.block_mode(provider)),
                retry_after: Some(Duration::from_secs(retry_after)),
                message: Some(format!(
                    "{provider}: {window} quota at {:.1}%, blocking until window reset",
                    binding * 100.0
                )),
                usage,
            };
        }

        let (warning_level, recommended_action, message) = if binding >= WARN_RED {
            (
                WarningLevel::Red,
                RecommendedAction::Throttle,
                Some(format!(
                    "{provider}: quota at {:.1}%, throttle non-essential requests",
                    binding * 100.0
                )),
            )
        } else if binding >= WARN_YELLOW {
            (
                WarningLevel::Yellow,
                RecommendedAction::Monitor,
                Some(format!("{provider}: quota at {:.1}%", binding * 100.0)),
            )
        } else {
            (WarningLevel::None, RecommendedAction::Proceed, None)
        };

        QuotaDecision {
            provider,
            allowed: true,
            warning_level,
            recommended_action,
            fallback_mode: None,
            retry_after: None,
            message,
            usage,
        }
    }

    /// Emit the alert a decision calls for, deduplicated per provider and
    /// level within a one hour window.
    pub fn note_warning(&self, decision: &QuotaDecision) {
        if decision.warning_level == WarningLevel::None {
            return;
        }
        let now = Utc::now();
        {
            let mut recent = match self.recent_warnings.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let key = (decision.provider, decision.warning_level);
            if let Some(last) = recent.get(&key) {
                if (now - *last).num_seconds() < WARNING_DEDUP_SECS {
                    return;
                }
            }
            recent.insert(key, now);
        }

        let kind = if decision.warning_level == WarningLevel::Blocked {
            AlertKind::QuotaBlocked
        } else {
            AlertKind::QuotaWarning
        };
        self.alerts.notify(Alert {
            kind,
            provider: decision.provider,
            message: decision
                .message
                .clone()
                .unwrap_or_else(|| format!("{} quota warning", decision.provider)),
            payload: json!({
                "level": decision.warning_level.as_str(),
                "daily": decision.usage.daily,
                "hourly": decision.usage.hourly,
            }),
        });
    }

    /// Replace the limits for one provider, with validation and an audit
    /// record naming the actor.
    pub fn update_limits(
        &self,
        provider: Provider,
        new_limits: ProviderLimits,
        actor: &str,
    ) -> Result<()> {
        let old_limits = {
            let mut config = match self.config.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let old = config.limits_for(provider);
            let mut candidate = config.clone();
            candidate.limits.insert(provider, new_limits);
            candidate.validate()?;
            *config = candidate;
            old
        };

        self.audit.append(AuditRecord {
            action: "limits_updated".to_string(),
            provider,
            actor: actor.to_string(),
            old_values: json!(old_limits),
            new_values: json!(new_limits),
            at: Utc::now(),
        });
        metrics::counter!(
            telemetry::LIMIT_UPDATES_TOTAL,
            "provider" => provider.as_str(),
            "actor" => actor.to_string(),
        )
        .increment(1);
        tracing::info!(
            provider = provider.as_str(),
            actor,
            daily = new_limits.daily,
            hourly = new_limits.hourly,
            "provider limits updated"
        );
        Ok(())
    }

    pub fn limits(&self, provider: Provider) -> ProviderLimits {
        match self.config.read() {
            Ok(guard) => guard.limits_for(provider),
            Err(poisoned) => poisoned.into_inner().limits_for(provider),
        }
    }

    pub fn budget(&self, provider: Provider) -> crate::limits::config::ProviderBudget {
        match self.config.read() {
            Ok(guard) => guard.budget_for(provider),
            Err(poisoned) => poisoned.into_inner().budget_for(provider),
        }
    }

    pub fn chain(&self, provider: Provider) -> Vec<FallbackTarget> {
        match self.config.read() {
            Ok(guard) => guard.chain_for(provider),
            Err(poisoned) => poisoned.into_inner().chain_for(provider),
        }
    }

    pub fn counter(&self) -> &Arc<UsageCounter> {
        &self.counter
    }

    /// Fallback strategy applied when this provider blocks.
    pub fn block_mode(&self, provider: Provider) -> FallbackMode {
        match provider {
            Provider::GoogleMaps => FallbackMode::AlternativeApi,
            Provider::Nominatim => FallbackMode::CacheOnly,
            Provider::OpenRouteService => FallbackMode::Degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{MemoryAlertSink, MemoryAuditLog};
    use chrono::TimeZone;

    fn governor_with(counter: Arc<UsageCounter>) -> (QuotaGovernor, Arc<MemoryAlertSink>) {
        let alerts = Arc::new(MemoryAlertSink::new());
        let governor = QuotaGovernor::new(
            counter,
            LimitsConfig::default(),
            Arc::clone(&alerts) as Arc<dyn AlertSink>,
            Arc::new(MemoryAuditLog::new()),
        );
        (governor, alerts)
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 17, h, m, s).unwrap()
    }

    /// Spread `count` requests over the day so only the daily window binds.
    fn seed_daily(counter: &UsageCounter, provider: Provider, count: u32) {
        let per_hour = count / 24;
        let remainder = count % 24;
        for hour in 0..24u32 {
            let n = per_hour + u32::from(hour < remainder);
            for i in 0..n {
                let minute = (i / 60) % 60;
                let second = i % 60;
                counter.record_at(provider, true, 10, at(hour, minute, second));
            }
        }
    }

    #[test]
    fn quiet_provider_proceeds() {
        let counter = Arc::new(UsageCounter::new());
        let (governor, _) = governor_with(Arc::clone(&counter));
        let decision = governor.check_request_at(Provider::GoogleMaps, at(12, 30, 30));
        assert!(decision.allowed);
        assert_eq!(decision.warning_level, WarningLevel::None);
        assert_eq!(decision.recommended_action, RecommendedAction::Proceed);
    }

    #[test]
    fn red_warning_still_allows_requests() {
        // 920 of a 1000-request daily budget sits in the red band but
        // below the block threshold.
        let counter = Arc::new(UsageCounter::new());
        let (governor, _) = governor_with(Arc::clone(&counter));
        governor
            .update_limits(
                Provider::Nominatim,
                ProviderLimits {
                    per_second: 1,
                    hourly: 3_600,
                    daily: 1_000,
                    cost_per_request: 0.0,
                },
                "test",
            )
            .unwrap();
        seed_daily(&counter, Provider::Nominatim, 920);

        let decision = governor.check_request_at(Provider::Nominatim, at(23, 59, 59));
        assert!(decision.allowed);
        assert_eq!(decision.warning_level, WarningLevel::Red);
        assert_eq!(decision.recommended_action, RecommendedAction::Throttle);
    }

    #[test]
    fn daily_quota_at_96_percent_blocks_with_alternative_api() {
        let counter = Arc::new(UsageCounter::new());
        let (governor, _) = governor_with(Arc::clone(&counter));
        seed_daily(&counter, Provider::GoogleMaps, 24_000);

        let decision = governor.check_request_at(Provider::GoogleMaps, at(23, 30, 30));
        assert!(!decision.allowed);
        assert_eq!(decision.warning_level, WarningLevel::Blocked);
        assert_eq!(decision.fallback_mode, Some(FallbackMode::AlternativeApi));
        // Retry points at the daily reset.
        let retry = decision.retry_after.unwrap();
        assert_eq!(retry.as_secs(), 29 * 60 + 30);
    }

    #[test]
    fn nominatim_enforces_one_second_spacing() {
        let counter = Arc::new(UsageCounter::new());
        let (governor, _) = governor_with(Arc::clone(&counter));
        // A just-recorded request makes the Instant gap well under 1s.
        counter.record(Provider::Nominatim, true, 25);

        let decision = governor.check_request_at(Provider::Nominatim, at(12, 0, 1));
        assert!(!decision.allowed);
        assert_eq!(decision.fallback_mode, Some(FallbackMode::CacheOnly));
        assert_eq!(decision.retry_after, Some(Duration::from_secs(1)));
    }

    #[test]
    fn warning_level_is_monotonic_in_usage() {
        let counter = Arc::new(UsageCounter::new());
        let (governor, _) = governor_with(Arc::clone(&counter));
        governor
            .update_limits(
                Provider::OpenRouteService,
                ProviderLimits {
                    per_second: 1_000,
                    hourly: 1_000_000,
                    daily: 100,
                    cost_per_request: 0.0,
                },
                "test",
            )
            .unwrap();

        let mut last = WarningLevel::None;
        for i in 0..100u32 {
            let second = i % 60;
            let minute = 10 + i / 60;
            counter.record_at(
                Provider::OpenRouteService,
                true,
                5,
                at(12, minute, second),
            );
            let decision = governor.check_request_at(Provider::OpenRouteService, at(13, 30, 30));
            assert!(decision.warning_level >= last);
            last = decision.warning_level;
        }
        assert_eq!(last, WarningLevel::Blocked);
    }

    #[test]
    fn warnings_are_deduplicated_within_an_hour() {
        let counter = Arc::new(UsageCounter::new());
        let (governor, alerts) = governor_with(Arc::clone(&counter));
        seed_daily(&counter, Provider::GoogleMaps, 21_000);

        let decision = governor.check_request_at(Provider::GoogleMaps, at(23, 0, 30));
        assert_eq!(decision.warning_level, WarningLevel::Yellow);
        governor.note_warning(&decision);
        governor.note_warning(&decision);
        governor.note_warning(&decision);
        assert_eq!(alerts.snapshot().len(), 1);
    }

    #[test]
    fn update_limits_writes_an_audit_record() {
        let counter = Arc::new(UsageCounter::new());
        let alerts = Arc::new(MemoryAlertSink::new());
        let audit = Arc::new(MemoryAuditLog::new());
        let governor = QuotaGovernor::new(
            counter,
            LimitsConfig::default(),
            alerts,
            Arc::clone(&audit) as Arc<dyn AuditLog>,
        );

        governor
            .update_limits(
                Provider::GoogleMaps,
                ProviderLimits {
                    per_second: 10,
                    hourly: 1_000,
                    daily: 10_000,
                    cost_per_request: 0.004,
                },
                "ops-team",
            )
            .unwrap();

        let records = audit.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].actor, "ops-team");
        assert_eq!(records[0].provider, Provider::GoogleMaps);
        assert_eq!(governor.limits(Provider::GoogleMaps).daily, 10_000);
    }

    #[test]
    fn invalid_limit_update_is_rejected_and_keeps_old_values() {
        let counter = Arc::new(UsageCounter::new());
        let (governor, _) = governor_with(counter);
        let before = governor.limits(Provider::GoogleMaps);
        let result = governor.update_limits(
            Provider::GoogleMaps,
            ProviderLimits {
                per_second: 0,
                hourly: 0,
                daily: 0,
                cost_per_request: 0.0,
            },
            "test",
        );
        assert!(result.is_err());
        assert_eq!(governor.limits(Provider::GoogleMaps), before);
    }
}
