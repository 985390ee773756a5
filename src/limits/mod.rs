//! Quota governance: limits configuration, the request governor, fallback
//! orchestration, published-limit change detection and budget monitoring.

mod budget;
mod config;
mod detect;
mod fallback;
mod governor;

pub use budget::{BudgetAlert, BudgetMonitor, BudgetSeverity, EMERGENCY_THRESHOLD, WARNING_THRESHOLD};
pub use config::{LimitsConfig, ProviderBudget, ProviderLimits};
pub use detect::{
    DetectedChange, HttpQuotaProbe, LimitChangeDetector, ProbedLimits, QuotaProbe,
    AUTO_UPDATE_CONFIDENCE,
};
pub use fallback::FallbackOrchestrator;
pub use governor::{QuotaGovernor, BLOCK_THRESHOLD, WARN_RED, WARN_YELLOW};
