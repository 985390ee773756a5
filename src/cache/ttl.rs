//! Adaptive TTL calculation.
//!
//! Each cache kind carries a base TTL and clamp bounds; the base is scaled
//! by result confidence, traffic sensitivity, local time of day, route
//! distance or autocomplete popularity, then clamped into `[min, max]`.

use std::time::Duration;

use chrono::{DateTime, Datelike, Local, Timelike, Weekday};

use crate::types::{CacheKind, CacheOptions};

/// Local wall-clock context a TTL or prediction decision depends on.
/// Extracted so the formulas stay pure and testable at fixed times.
#[derive(Debug, Clone, Copy)]
pub struct LocalMoment {
    pub hour: u32,
    pub workday: bool,
}

impl LocalMoment {
    pub fn new(hour: u32, workday: bool) -> Self {
        Self { hour, workday }
    }

    pub fn from_datetime(at: DateTime<Local>) -> Self {
        let workday = !matches!(at.weekday(), Weekday::Sat | Weekday::Sun);
        Self {
            hour: at.hour(),
            workday,
        }
    }

    pub fn now() -> Self {
        Self::from_datetime(Local::now())
    }

    /// Morning or evening rush hour (7-9 and 17-19, inclusive).
    pub fn is_rush_hour(&self) -> bool {
        (7..=9).contains(&self.hour) || (17..=19).contains(&self.hour)
    }

    /// Business hours window used by prediction scoring (6-18 inclusive).
    pub fn is_business_hours(&self) -> bool {
        (6..=18).contains(&self.hour)
    }
}

struct TtlStrategy {
    base: u64,
    min: u64,
    max: u64,
}

fn strategy(kind: CacheKind) -> TtlStrategy {
    match kind {
        CacheKind::Geocoding => TtlStrategy {
            base: 30 * 86_400,
            min: 86_400,
            max: 90 * 86_400,
        },
        CacheKind::Route => TtlStrategy {
            base: 3_600,
            min: 300,
            max: 86_400,
        },
        CacheKind::Traffic => TtlStrategy {
            base: 300,
            min: 60,
            max: 900,
        },
        CacheKind::Matrix => TtlStrategy {
            base: 1_800,
            min: 300,
            max: 3_600,
        },
        CacheKind::Autocomplete => TtlStrategy {
            base: 3_600,
            min: 600,
            max: 86_400,
        },
    }
}

/// Compute the TTL for a fresh entry.
///
/// `confidence` applies to geocoding only and is clamped to [0.5, 2.0]
/// as a multiplier. Routes requested with live traffic pin to a short
/// TTL; traffic TTLs halve during rush hours.
pub fn calculate_optimal_ttl(
    kind: CacheKind,
    confidence: Option<f64>,
    options: &CacheOptions,
    moment: LocalMoment,
) -> Duration {
    let strategy = strategy(kind);
    let mut seconds = strategy.base as f64;

    match kind {
        CacheKind::Geocoding => {
            if let Some(confidence) = confidence {
                seconds *= confidence.clamp(0.5, 2.0);
            }
        }
        CacheKind::Route => {
            if options.with_traffic {
                seconds = 300.0;
            }
        }
        CacheKind::Traffic => {
            if moment.is_rush_hour() {
                seconds /= 2.0;
            }
        }
        CacheKind::Matrix => {
            if let Some(distance_km) = options.distance_km {
                seconds *= (1.0 + distance_km / 100.0).clamp(1.0, 2.0);
            }
        }
        CacheKind::Autocomplete => {
            if let Some(popularity) = options.popularity {
                seconds *= (0.5 + popularity).clamp(0.5, 2.0);
            }
        }
    }

    let clamped = seconds.round().clamp(strategy.min as f64, strategy.max as f64);
    Duration::from_secs(clamped as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> LocalMoment {
        LocalMoment::new(13, true)
    }

    #[test]
    fn geocoding_scales_with_confidence() {
        let base = calculate_optimal_ttl(CacheKind::Geocoding, Some(1.0), &Default::default(), quiet());
        let high = calculate_optimal_ttl(CacheKind::Geocoding, Some(2.0), &Default::default(), quiet());
        assert_eq!(base, Duration::from_secs(30 * 86_400));
        assert_eq!(high, Duration::from_secs(60 * 86_400));
    }

    #[test]
    fn geocoding_confidence_is_clamped() {
        // A zero-confidence result still keeps at least half the base TTL,
        // and the floor/ceiling hold for absurd multipliers.
        let zero = calculate_optimal_ttl(CacheKind::Geocoding, Some(0.0), &Default::default(), quiet());
        assert_eq!(zero, Duration::from_secs(15 * 86_400));
        let huge = calculate_optimal_ttl(CacheKind::Geocoding, Some(10.0), &Default::default(), quiet());
        assert_eq!(huge, Duration::from_secs(60 * 86_400));
    }

    #[test]
    fn traffic_routes_pin_to_five_minutes() {
        let options = CacheOptions {
            with_traffic: true,
            ..Default::default()
        };
        let ttl = calculate_optimal_ttl(CacheKind::Route, None, &options, quiet());
        assert_eq!(ttl, Duration::from_secs(300));
    }

    #[test]
    fn traffic_ttl_halves_at_rush_hour() {
        let rush = LocalMoment::new(8, true);
        let calm = LocalMoment::new(13, true);
        assert_eq!(
            calculate_optimal_ttl(CacheKind::Traffic, None, &Default::default(), rush),
            Duration::from_secs(150)
        );
        assert_eq!(
            calculate_optimal_ttl(CacheKind::Traffic, None, &Default::default(), calm),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn rush_hour_edges_are_inclusive() {
        for hour in [7, 9, 17, 19] {
            assert!(LocalMoment::new(hour, true).is_rush_hour());
        }
        for hour in [6, 10, 16, 20] {
            assert!(!LocalMoment::new(hour, true).is_rush_hour());
        }
    }

    #[test]
    fn matrix_stretches_for_long_routes() {
        let long = CacheOptions {
            distance_km: Some(250.0),
            ..Default::default()
        };
        let ttl = calculate_optimal_ttl(CacheKind::Matrix, None, &long, quiet());
        // Factor caps at 2.0 and the result clamps to the 1 hour max.
        assert_eq!(ttl, Duration::from_secs(3_600));
    }

    #[test]
    fn autocomplete_popularity_scales_ttl() {
        let popular = CacheOptions {
            popularity: Some(1.0),
            ..Default::default()
        };
        let unknown = CacheOptions {
            popularity: Some(0.0),
            ..Default::default()
        };
        assert_eq!(
            calculate_optimal_ttl(CacheKind::Autocomplete, None, &popular, quiet()),
            Duration::from_secs(5_400)
        );
        assert_eq!(
            calculate_optimal_ttl(CacheKind::Autocomplete, None, &unknown, quiet()),
            Duration::from_secs(1_800)
        );
    }
}
