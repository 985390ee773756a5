//! Per-provider usage accounting.
//!
//! Requests are bucketed into second, hour and day windows keyed by local
//! wall-clock time, matching the windows provider quotas are expressed in.
//! Recording is infallible and cheap; a telemetry failure must never block
//! a request.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};

use crate::types::Provider;

/// Granularity of a usage window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    Second,
    Hour,
    Day,
}

impl WindowKind {
    fn key(&self, at: DateTime<Local>) -> String {
        match self {
            WindowKind::Second => at.format("%Y-%m-%d %H:%M:%S").to_string(),
            WindowKind::Hour => at.format("%Y-%m-%d %H:00").to_string(),
            WindowKind::Day => at.format("%Y-%m-%d").to_string(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct WindowStats {
    requests: u64,
    errors: u64,
    total_response_ms: u64,
}

/// Point-in-time usage view for one provider, as seen by the governor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub per_second: u64,
    pub hourly: u64,
    pub daily: u64,
    pub hourly_errors: u64,
    pub daily_errors: u64,
    pub hourly_avg_response_ms: f64,
    pub daily_avg_response_ms: f64,
    /// Seconds since the previous request to this provider, if any.
    pub seconds_since_last_request: Option<f64>,
}

/// Thread-safe request counter shared by the governor, dispatcher and
/// budget monitor.
#[derive(Debug, Default)]
pub struct UsageCounter {
    windows: Mutex<HashMap<(Provider, WindowKind, String), WindowStats>>,
    last_request: Mutex<HashMap<Provider, Instant>>,
}

impl UsageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed upstream request.
    pub fn record(&self, provider: Provider, success: bool, response_ms: u64) {
        self.record_at(provider, success, response_ms, Local::now());
        let mut last = match self.last_request.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        last.insert(provider, Instant::now());
    }

    /// Record into the windows at an explicit timestamp, without touching
    /// the request-spacing tracker. Exposed so tests can build
    /// deterministic usage histories.
    pub fn record_at(
        &self,
        provider: Provider,
        success: bool,
        response_ms: u64,
        at: DateTime<Local>,
    ) {
        {
            let mut windows = match self.windows.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for kind in [WindowKind::Second, WindowKind::Hour, WindowKind::Day] {
                let stats = windows
                    .entry((provider, kind, kind.key(at)))
                    .or_default();
                stats.requests += 1;
                if !success {
                    stats.errors += 1;
                }
                stats.total_response_ms += response_ms;
            }
        }
    }

    /// Current usage snapshot for `provider`.
    pub fn usage(&self, provider: Provider) -> UsageSnapshot {
        self.usage_at(provider, Local::now())
    }

    /// Usage snapshot as of an explicit timestamp.
    pub fn usage_at(&self, provider: Provider, now: DateTime<Local>) -> UsageSnapshot {
        let windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let lookup = |kind: WindowKind| -> WindowStats {
            windows
                .get(&(provider, kind, kind.key(now)))
                .cloned()
                .unwrap_or_default()
        };
        let second = lookup(WindowKind::Second);
        let hour = lookup(WindowKind::Hour);
        let day = lookup(WindowKind::Day);
        drop(windows);

        let avg = |stats: &WindowStats| {
            if stats.requests == 0 {
                0.0
            } else {
                stats.total_response_ms as f64 / stats.requests as f64
            }
        };
        let since_last = {
            let last = match self.last_request.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            last.get(&provider).map(|t| t.elapsed().as_secs_f64())
        };

        UsageSnapshot {
            per_second: second.requests,
            hourly: hour.requests,
            daily: day.requests,
            hourly_errors: hour.errors,
            daily_errors: day.errors,
            hourly_avg_response_ms: avg(&hour),
            daily_avg_response_ms: avg(&day),
            seconds_since_last_request: since_last,
        }
    }

    /// Total requests for `provider` in the month containing `now`.
    pub fn monthly_requests(&self, provider: Provider, now: DateTime<Local>) -> u64 {
        let prefix = format!("{:04}-{:02}-", now.year(), now.month());
        let windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        windows
            .iter()
            .filter(|((p, kind, key), _)| {
                *p == provider && *kind == WindowKind::Day && key.starts_with(&prefix)
            })
            .map(|(_, stats)| stats.requests)
            .sum()
    }

    /// Drop windows older than `keep_days` days. Second and hour windows
    /// are pruned by their embedded date; day windows by the same cutoff.
    pub fn prune(&self, keep_days: i64) {
        let cutoff = (Local::now() - chrono::Duration::days(keep_days))
            .format("%Y-%m-%d")
            .to_string();
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Every window key starts with its %Y-%m-%d date, so a lexicographic
        // compare against the cutoff date works for all three granularities.
        windows.retain(|(_, _, key), _| key.as_str() >= cutoff.as_str());
    }

    /// Number of seconds until the top of the next hour, for retry hints.
    pub fn seconds_to_next_hour(now: DateTime<Local>) -> u64 {
        3600 - u64::from(now.num_seconds_from_midnight()) % 3600
    }

    /// Number of seconds until local midnight, for retry hints.
    pub fn seconds_to_next_day(now: DateTime<Local>) -> u64 {
        86_400 - u64::from(now.num_seconds_from_midnight())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 15, h, m, s).unwrap()
    }

    #[test]
    fn windows_roll_over_between_seconds() {
        let counter = UsageCounter::new();
        counter.record_at(Provider::Nominatim, true, 40, at(10, 0, 0));
        counter.record_at(Provider::Nominatim, true, 60, at(10, 0, 1));

        let usage = counter.usage_at(Provider::Nominatim, at(10, 0, 1));
        assert_eq!(usage.per_second, 1);
        assert_eq!(usage.hourly, 2);
        assert_eq!(usage.daily, 2);
        assert_eq!(usage.hourly_avg_response_ms, 50.0);
    }

    #[test]
    fn errors_are_counted_separately() {
        let counter = UsageCounter::new();
        counter.record_at(Provider::GoogleMaps, true, 10, at(9, 0, 0));
        counter.record_at(Provider::GoogleMaps, false, 10, at(9, 0, 0));

        let usage = counter.usage_at(Provider::GoogleMaps, at(9, 0, 0));
        assert_eq!(usage.hourly, 2);
        assert_eq!(usage.hourly_errors, 1);
        assert_eq!(usage.daily_errors, 1);
    }

    #[test]
    fn usage_in_other_windows_is_invisible() {
        let counter = UsageCounter::new();
        counter.record_at(Provider::GoogleMaps, true, 10, at(9, 0, 0));

        let usage = counter.usage_at(Provider::GoogleMaps, at(11, 0, 0));
        assert_eq!(usage.hourly, 0);
        assert_eq!(usage.daily, 1);
    }

    #[test]
    fn monthly_totals_sum_day_windows() {
        let counter = UsageCounter::new();
        let d1 = Local.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let d2 = Local.with_ymd_and_hms(2026, 8, 20, 12, 0, 0).unwrap();
        let other_month = Local.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();
        counter.record_at(Provider::OpenRouteService, true, 10, d1);
        counter.record_at(Provider::OpenRouteService, true, 10, d2);
        counter.record_at(Provider::OpenRouteService, true, 10, other_month);

        assert_eq!(counter.monthly_requests(Provider::OpenRouteService, d2), 2);
    }

    #[test]
    fn retry_hints_count_down_to_window_reset() {
        let now = at(10, 59, 30);
        assert_eq!(UsageCounter::seconds_to_next_hour(now), 30);
        assert_eq!(
            UsageCounter::seconds_to_next_day(now),
            13 * 3600 + 30 // 10:59:30 -> midnight
        );
    }
}
