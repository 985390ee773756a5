//! Upstream provider identity and fallback chain targets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GeogateError;

/// The closed set of upstream geocoding/routing providers.
///
/// Dispatch on provider identity is always an exhaustive match, so adding
/// a provider is a compile-time change rather than a stringly-typed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    GoogleMaps,
    Nominatim,
    OpenRouteService,
}

impl Provider {
    /// All known providers, in dashboard display order.
    pub const ALL: [Provider; 3] = [
        Provider::GoogleMaps,
        Provider::Nominatim,
        Provider::OpenRouteService,
    ];

    /// Stable wire/storage name (used in fingerprints, tags, metrics labels).
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GoogleMaps => "google_maps",
            Provider::Nominatim => "nominatim",
            Provider::OpenRouteService => "openrouteservice",
        }
    }

    /// Invalidation tag covering every cache entry written from this
    /// provider, e.g. `provider_google_maps`.
    pub fn invalidation_tag(&self) -> String {
        format!("provider_{}", self.as_str())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = GeogateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google_maps" => Ok(Provider::GoogleMaps),
            "nominatim" => Ok(Provider::Nominatim),
            "openrouteservice" => Ok(Provider::OpenRouteService),
            other => Err(GeogateError::InvalidInput(format!(
                "unknown provider: {other}"
            ))),
        }
    }
}

/// One entry in a provider's fallback chain: either an alternate provider
/// or the cache-only strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackTarget {
    Provider(Provider),
    CacheOnly,
}

impl FallbackTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackTarget::Provider(p) => p.as_str(),
            FallbackTarget::CacheOnly => "cache_only",
        }
    }
}

impl fmt::Display for FallbackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<FallbackTarget> for String {
    fn from(target: FallbackTarget) -> Self {
        target.as_str().to_string()
    }
}

impl TryFrom<String> for FallbackTarget {
    type Error = GeogateError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "cache_only" {
            return Ok(FallbackTarget::CacheOnly);
        }
        Ok(FallbackTarget::Provider(s.parse()?))
    }
}

impl Serialize for FallbackTarget {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FallbackTarget {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FallbackTarget::try_from(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_round_trips_through_str() {
        for provider in Provider::ALL {
            assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
    }

    #[test]
    fn unknown_provider_is_invalid_input() {
        let err = "bing_maps".parse::<Provider>().unwrap_err();
        assert!(matches!(err, GeogateError::InvalidInput(_)));
    }

    #[test]
    fn fallback_target_serde_uses_wire_names() {
        let json = serde_json::to_string(&FallbackTarget::CacheOnly).unwrap();
        assert_eq!(json, "\"cache_only\"");
        let back: FallbackTarget = serde_json::from_str("\"openrouteservice\"").unwrap();
        assert_eq!(back, FallbackTarget::Provider(Provider::OpenRouteService));
    }
}
