//! Public types for the Geogate API.

mod decision;
mod provider;
mod request;

pub use decision::{
    FallbackMode, FallbackOutcome, QuotaDecision, RecommendedAction, WarningLevel,
};
pub use provider::{FallbackTarget, Provider};
pub use request::{CacheKind, CacheOptions, ProviderRequest, ProviderResponse};
