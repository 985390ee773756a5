//! Geogate - Adaptive response cache and API-quota governor for
//! geocoding/routing providers
//!
//! This crate sits between an application and its map providers (Google
//! Maps, Nominatim, OpenRouteService). Every request first walks a
//! multi-layer cache (in-process, durable, fuzzy), then a quota governor
//! decides whether the upstream call may go out; blocked or failing
//! providers degrade through a configurable fallback chain instead of
//! erroring.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use geogate::{
//!     CacheKind, CacheOptions, Gateway, Provider, ProviderAdapter,
//!     ProviderRequest, ProviderResponse,
//! };
//! use serde_json::json;
//!
//! struct GoogleAdapter;
//!
//! #[async_trait::async_trait]
//! impl ProviderAdapter for GoogleAdapter {
//!     fn provider(&self) -> Provider {
//!         Provider::GoogleMaps
//!     }
//!     async fn fetch(&self, request: &ProviderRequest) -> geogate::Result<ProviderResponse> {
//!         // Call the real API here.
//!         Ok(ProviderResponse {
//!             provider: Provider::GoogleMaps,
//!             payload: json!({"location": {"lat": 52.52, "lng": 13.405}}),
//!             confidence: Some(0.9),
//!         })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> geogate::Result<()> {
//!     let gateway = Gateway::builder()
//!         .adapter(Arc::new(GoogleAdapter))
//!         .build()?;
//!
//!     let request = ProviderRequest::new(
//!         Provider::GoogleMaps,
//!         CacheKind::Geocoding,
//!         "/geocode",
//!         json!({"address": "Hauptstraße 1, Berlin"}),
//!     );
//!     let options = CacheOptions {
//!         original_input: Some("Hauptstraße 1, Berlin".to_string()),
//!         ..Default::default()
//!     };
//!     let response = gateway.get(&request, &options).await?;
//!     println!("{:?} -> {:?}", response.source, response.payload);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod error;
pub mod gateway;
pub mod limits;
pub mod store;
pub mod telemetry;
pub mod traits;
pub mod types;
pub mod usage;
pub mod warming;

// Re-export main types at crate root
pub use error::{GeogateError, Result};
pub use gateway::{
    DashboardReport, Dispatch, Dispatcher, Gateway, GatewayBuilder, GatewayResponse,
    ProviderReport, ResponseSource,
};
pub use traits::{
    Alert, AlertKind, AlertSink, AuditLog, AuditRecord, DurableStore, MemoryAlertSink,
    MemoryAuditLog, ProviderAdapter, TracingAlertSink, TracingAuditLog,
};

// Re-export the cache surface
pub use cache::{
    normalize_address, CacheEntry, CacheLayer, CacheStatsReport, CacheStore, CacheStoreConfig,
    EntryMetadata, FetchedValue, Fill, FuzzyConfig, Lookup,
};

// Re-export governance types
pub use limits::{
    BudgetAlert, BudgetMonitor, BudgetSeverity, DetectedChange, FallbackOrchestrator,
    HttpQuotaProbe, LimitChangeDetector, LimitsConfig, ProbedLimits, ProviderBudget,
    ProviderLimits, QuotaGovernor, QuotaProbe,
};

// Re-export all request/decision types
pub use types::{
    CacheKind, CacheOptions, FallbackMode, FallbackOutcome, FallbackTarget, Provider,
    ProviderRequest, ProviderResponse, QuotaDecision, RecommendedAction, WarningLevel,
};

pub use store::MemoryStore;
pub use usage::{UsageCounter, UsageSnapshot};
pub use warming::{JobStatus, WarmingJob, WarmingQueue, WarmingReport, WarmingScheduler};
