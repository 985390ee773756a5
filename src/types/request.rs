//! Request and response types for upstream provider calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Provider;

/// The kind of cached operation. Drives TTL strategy, prediction scoring
/// and cost accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    Route,
    Geocoding,
    Traffic,
    Matrix,
    Autocomplete,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Route => "route",
            CacheKind::Geocoding => "geocoding",
            CacheKind::Traffic => "traffic",
            CacheKind::Matrix => "matrix",
            CacheKind::Autocomplete => "autocomplete",
        }
    }

    /// Estimated per-request cost in EUR for this kind of upstream call.
    /// Used for the `cost_saved` statistic and budget projections.
    pub fn api_cost(&self) -> f64 {
        match self {
            CacheKind::Route | CacheKind::Geocoding | CacheKind::Traffic => 0.005,
            CacheKind::Matrix => 0.01,
            CacheKind::Autocomplete => 0.00283,
        }
    }
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request destined for one upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub provider: Provider,
    pub kind: CacheKind,
    /// Provider-relative endpoint path, e.g. `/geocode/json`.
    pub endpoint: String,
    /// Request parameters. Serialized deterministically (object keys are
    /// sorted) so the fingerprint is stable across equivalent requests.
    pub params: Value,
}

impl ProviderRequest {
    pub fn new(
        provider: Provider,
        kind: CacheKind,
        endpoint: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            provider,
            kind,
            endpoint: endpoint.into(),
            params,
        }
    }

    /// Cache fingerprint for this request. Provider-independent: the same
    /// logical request served by a fallback provider hits the same entry.
    pub fn fingerprint(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.params)
    }

    /// The same logical request re-aimed at a different provider, used
    /// when walking a fallback chain.
    pub fn retargeted(&self, provider: Provider) -> Self {
        Self {
            provider,
            ..self.clone()
        }
    }
}

/// Per-request caching hints supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// Route requests that include live traffic get a short TTL.
    pub with_traffic: bool,
    /// Playlist the cached route belongs to; adds a `playlist_{id}` tag.
    pub playlist_id: Option<i64>,
    /// Raw address text as the user typed it, enables fuzzy matching.
    pub original_input: Option<String>,
    /// Route distance in km, stretches matrix TTLs for long hauls.
    pub distance_km: Option<f64>,
    /// Popularity weight in [0, 1] for autocomplete TTL scaling.
    pub popularity: Option<f64>,
}

/// A successful response from an upstream provider adapter.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub provider: Provider,
    pub payload: Value,
    /// Provider-reported confidence in [0, 1], when available. Feeds the
    /// TTL multiplier for geocoding results.
    pub confidence: Option<f64>,
}
