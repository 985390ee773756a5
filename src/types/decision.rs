//! Decision values produced by the quota governor and fallback orchestrator.
//!
//! Denials and degradations are ordinary return values, never errors, so
//! callers can branch on them without catching anything.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Provider;
use crate::usage::UsageSnapshot;

/// Escalating usage warning level.
///
/// Ordered: `None < Yellow < Red < Blocked`. The level is monotonic in the
/// usage ratio, so tests can assert ordering directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningLevel {
    None,
    Yellow,
    Red,
    Blocked,
}

impl WarningLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningLevel::None => "none",
            WarningLevel::Yellow => "yellow",
            WarningLevel::Red => "red",
            WarningLevel::Blocked => "blocked",
        }
    }
}

/// What the caller should do with an allowed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Proceed,
    Monitor,
    Throttle,
    Fallback,
}

/// Strategy applied when a provider is blocked or failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// Serve from cache layers only, no upstream call at all.
    CacheOnly,
    /// Walk the provider's fallback chain.
    AlternativeApi,
    /// Return a synthetic degraded answer the caller can render.
    Degraded,
    /// Nothing left to try; the caller must wait.
    Blocked,
}

impl FallbackMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackMode::CacheOnly => "cache_only",
            FallbackMode::AlternativeApi => "alternative_api",
            FallbackMode::Degraded => "degraded_service",
            FallbackMode::Blocked => "service_blocked",
        }
    }
}

/// Outcome of a quota check for one prospective upstream request.
#[derive(Debug, Clone)]
pub struct QuotaDecision {
    pub provider: Provider,
    pub allowed: bool,
    pub warning_level: WarningLevel,
    pub recommended_action: RecommendedAction,
    /// Set when the request is denied: how the caller should degrade.
    pub fallback_mode: Option<FallbackMode>,
    /// Set when the request is denied: when the binding window resets.
    pub retry_after: Option<Duration>,
    pub message: Option<String>,
    /// The usage snapshot the decision was derived from.
    pub usage: UsageSnapshot,
}

/// Result of executing a fallback strategy.
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub success: bool,
    pub payload: Option<Value>,
    /// Provider that actually served the response, if any.
    pub provider_used: Option<Provider>,
    pub mode: FallbackMode,
    pub fallback_used: bool,
    pub degraded: bool,
    pub retry_after: Option<Duration>,
}

impl FallbackOutcome {
    /// A terminal "nothing worked" outcome.
    pub fn blocked(retry_after: Option<Duration>) -> Self {
        Self {
            success: false,
            payload: None,
            provider_used: None,
            mode: FallbackMode::Blocked,
            fallback_used: true,
            degraded: false,
            retry_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_levels_are_ordered() {
        assert!(WarningLevel::None < WarningLevel::Yellow);
        assert!(WarningLevel::Yellow < WarningLevel::Red);
        assert!(WarningLevel::Red < WarningLevel::Blocked);
    }
}
