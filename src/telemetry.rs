//! Telemetry metric name constants.
//!
//! Centralised metric names for geogate operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `geogate_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `provider`: upstream provider (e.g. "google_maps", "nominatim")
//! - `kind`: cache kind (e.g. "route", "geocoding")
//! - `layer`: cache layer that served a hit ("fast" | "durable" | "fuzzy")
//! - `status`: outcome, "ok" or "error"
//! - `mode`: fallback mode ("cache_only" | "alternative_api" | ...)

/// Total upstream requests dispatched through the governed path.
///
/// Labels: `provider`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "geogate_requests_total";

/// Upstream request duration in seconds.
///
/// Labels: `provider`.
pub const REQUEST_DURATION_SECONDS: &str = "geogate_request_duration_seconds";

/// Total cache hits across all layers.
///
/// Labels: `kind`, `layer`.
pub const CACHE_HITS_TOTAL: &str = "geogate_cache_hits_total";

/// Total cache misses.
///
/// Labels: `kind`.
pub const CACHE_MISSES_TOTAL: &str = "geogate_cache_misses_total";

/// Total fuzzy matches accepted for near-duplicate geocoding requests.
pub const FUZZY_MATCHES_TOTAL: &str = "geogate_fuzzy_matches_total";

/// Total requests denied by the quota governor.
///
/// Labels: `provider`.
pub const QUOTA_DENIED_TOTAL: &str = "geogate_quota_denied_total";

/// Total fallback executions.
///
/// Labels: `provider`, `mode`.
pub const FALLBACK_TOTAL: &str = "geogate_fallback_total";

/// Total warming jobs that reached a terminal state.
///
/// Labels: `status` ("completed" | "failed").
pub const WARMING_JOBS_TOTAL: &str = "geogate_warming_jobs_total";

/// Total provider limit mutations (manual, auto-detected, or emergency).
///
/// Labels: `provider`, `actor`.
pub const LIMIT_UPDATES_TOTAL: &str = "geogate_limit_updates_total";
