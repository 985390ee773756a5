//! Cache entry record shared by the fast and durable layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CacheKind, CacheOptions, Provider};

/// Metadata recorded alongside a cached payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub provider: Provider,
    /// Provider-reported confidence in [0, 1], if any.
    pub confidence: Option<f64>,
    /// Raw input text as the user typed it (geocoding only).
    pub original_input: Option<String>,
    /// Normalized form of `original_input`, precomputed for fuzzy search.
    pub normalized_input: Option<String>,
    pub payload_bytes: usize,
    /// Estimated EUR cost of the upstream call this entry saves.
    pub api_cost: f64,
}

/// One cached upstream response with its freshness and popularity state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub kind: CacheKind,
    pub payload: Value,
    pub metadata: EntryMetadata,
    pub ttl_seconds: u64,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
    pub miss_count: u64,
    /// Likelihood in [0, 1] that this entry will be requested again soon.
    pub prediction_score: f64,
    pub invalidation_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Tags attached to a new entry so whole groups can be invalidated at
/// once: the kind tag always, `playlist_{id}` for routes, and the source
/// provider tag.
pub fn invalidation_tags(
    kind: CacheKind,
    provider: Provider,
    options: &CacheOptions,
) -> Vec<String> {
    let mut tags = vec![kind.as_str().to_string()];
    if kind == CacheKind::Route {
        if let Some(id) = options.playlist_id {
            tags.push(format!("playlist_{id}"));
        }
    }
    tags.push(provider.invalidation_tag());
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_tag_only_applies_to_routes() {
        let options = CacheOptions {
            playlist_id: Some(42),
            ..Default::default()
        };
        let route = invalidation_tags(CacheKind::Route, Provider::GoogleMaps, &options);
        assert!(route.contains(&"playlist_42".to_string()));
        assert!(route.contains(&"route".to_string()));
        assert!(route.contains(&"provider_google_maps".to_string()));

        let geo = invalidation_tags(CacheKind::Geocoding, Provider::GoogleMaps, &options);
        assert!(!geo.iter().any(|t| t.starts_with("playlist_")));
    }
}
