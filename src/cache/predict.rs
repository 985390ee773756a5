//! Re-request likelihood scoring.

use crate::cache::ttl::LocalMoment;
use crate::types::CacheKind;

/// Estimate how likely a cached result is to be requested again soon.
///
/// Base likelihood per kind, boosted during business hours, on workdays
/// and by demonstrated popularity (historical hits), clamped to [0, 1].
/// The score is stored on the entry and drives warming priority.
pub fn prediction_score(kind: CacheKind, historical_hits: u64, moment: LocalMoment) -> f64 {
    let mut score = match kind {
        CacheKind::Geocoding => 0.8,
        CacheKind::Route => 0.6,
        CacheKind::Traffic => 0.3,
        CacheKind::Matrix => 0.7,
        CacheKind::Autocomplete => 0.4,
    };

    if moment.is_business_hours() {
        score += 0.2;
    }
    if moment.workday {
        score += 0.1;
    }
    if historical_hits > 5 {
        score += (historical_hits as f64 * 0.02).min(0.3);
    }

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geocoding_on_a_busy_weekday_maxes_out() {
        let moment = LocalMoment::new(10, true);
        assert_eq!(prediction_score(CacheKind::Geocoding, 100, moment), 1.0);
    }

    #[test]
    fn traffic_at_night_on_weekend_stays_low() {
        let moment = LocalMoment::new(2, false);
        assert_eq!(prediction_score(CacheKind::Traffic, 0, moment), 0.3);
    }

    #[test]
    fn popularity_boost_needs_more_than_five_hits() {
        let moment = LocalMoment::new(2, false);
        let five = prediction_score(CacheKind::Route, 5, moment);
        let six = prediction_score(CacheKind::Route, 6, moment);
        assert_eq!(five, 0.6);
        assert!((six - 0.72).abs() < 1e-9);
    }

    #[test]
    fn popularity_boost_caps_at_point_three() {
        let moment = LocalMoment::new(2, false);
        let score = prediction_score(CacheKind::Route, 1_000, moment);
        assert!((score - 0.9).abs() < 1e-9);
    }
}
