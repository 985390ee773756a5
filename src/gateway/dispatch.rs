//! Governed upstream dispatch.
//!
//! Every upstream call, whether from a live request, a fallback chain or
//! the warming scheduler, goes through [`Dispatcher::fetch_governed`]: the
//! quota check runs first, the call is bounded by a timeout, and the
//! outcome lands in the usage counter either way.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::instrument;

use crate::error::{GeogateError, Result};
use crate::limits::QuotaGovernor;
use crate::telemetry;
use crate::traits::ProviderAdapter;
use crate::types::{Provider, ProviderRequest, ProviderResponse, QuotaDecision};
use crate::usage::UsageCounter;

pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a governed dispatch attempt. A denial is a value, not an
/// error; callers decide how to degrade.
#[derive(Debug)]
pub enum Dispatch {
    Fetched(ProviderResponse),
    Denied(QuotaDecision),
}

pub struct Dispatcher {
    governor: Arc<QuotaGovernor>,
    counter: Arc<UsageCounter>,
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        governor: Arc<QuotaGovernor>,
        counter: Arc<UsageCounter>,
        adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            governor,
            counter,
            adapters,
            timeout: timeout.unwrap_or(DEFAULT_UPSTREAM_TIMEOUT),
        }
    }

    pub fn has_adapter(&self, provider: Provider) -> bool {
        self.adapters.contains_key(&provider)
    }

    /// Check quota, then perform the upstream call under a timeout.
    ///
    /// Timeouts and transport failures count against the provider's error
    /// stats before the error propagates, so the governor sees them.
    #[instrument(skip(self, request), fields(provider = request.provider.as_str(), kind = request.kind.as_str()))]
    pub async fn fetch_governed(&self, request: &ProviderRequest) -> Result<Dispatch> {
        let provider = request.provider;
        let adapter = self
            .adapters
            .get(&provider)
            .ok_or(GeogateError::NoAdapter(provider))?;

        let decision = self.governor.check_request(provider);
        self.governor.note_warning(&decision);
        if !decision.allowed {
            metrics::counter!(telemetry::QUOTA_DENIED_TOTAL, "provider" => provider.as_str())
                .increment(1);
            tracing::debug!(
                provider = provider.as_str(),
                level = decision.warning_level.as_str(),
                "request denied by quota governor"
            );
            return Ok(Dispatch::Denied(decision));
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, adapter.fetch(request)).await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(GeogateError::Timeout {
                provider,
                after: self.timeout,
            }),
        };

        let status = if result.is_ok() { "ok" } else { "error" };
        self.counter
            .record(provider, result.is_ok(), elapsed.as_millis() as u64);
        metrics::counter!(
            telemetry::REQUESTS_TOTAL,
            "provider" => provider.as_str(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(
            telemetry::REQUEST_DURATION_SECONDS,
            "provider" => provider.as_str(),
        )
        .record(elapsed.as_secs_f64());

        result.map(Dispatch::Fetched)
    }
}
