//! Fallback orchestration for blocked or failing providers.

use std::sync::Arc;

use serde_json::json;
use tracing::instrument;

use crate::cache::{CacheStore, Lookup};
use crate::error::Result;
use crate::gateway::{Dispatch, Dispatcher};
use crate::limits::QuotaGovernor;
use crate::telemetry;
use crate::types::{
    CacheOptions, FallbackMode, FallbackOutcome, FallbackTarget, Provider, ProviderRequest,
};

/// Executes the fallback strategy a quota decision (or upstream failure)
/// calls for.
pub struct FallbackOrchestrator {
    governor: Arc<QuotaGovernor>,
    cache: Arc<CacheStore>,
    dispatcher: Arc<Dispatcher>,
}

impl FallbackOrchestrator {
    pub fn new(
        governor: Arc<QuotaGovernor>,
        cache: Arc<CacheStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            governor,
            cache,
            dispatcher,
        }
    }

    /// Run `mode` for a request whose primary provider is unavailable.
    ///
    /// Never returns `Err` for "nothing worked": exhaustion is expressed
    /// as an unsuccessful [`FallbackOutcome`]. Errors are reserved for
    /// infrastructure failures (a broken durable store, for instance).
    #[instrument(skip(self, request, options), fields(provider = request.provider.as_str(), mode = mode.as_str()))]
    pub async fn execute(
        &self,
        request: &ProviderRequest,
        options: &CacheOptions,
        mode: FallbackMode,
    ) -> Result<FallbackOutcome> {
        metrics::counter!(
            telemetry::FALLBACK_TOTAL,
            "provider" => request.provider.as_str(),
            "mode" => mode.as_str(),
        )
        .increment(1);

        match mode {
            FallbackMode::CacheOnly => self.cache_only(request, options).await,
            FallbackMode::AlternativeApi => self.alternative_api(request, options).await,
            FallbackMode::Degraded => Ok(self.degraded(request)),
            FallbackMode::Blocked => Ok(self.blocked(request.provider)),
        }
    }

    /// Serve from cache layers only; a miss is a terminal, unsuccessful
    /// outcome rather than an upstream call.
    async fn cache_only(
        &self,
        request: &ProviderRequest,
        options: &CacheOptions,
    ) -> Result<FallbackOutcome> {
        match self
            .cache
            .lookup(&request.fingerprint(), request.kind, options)
            .await?
        {
            Lookup::Hit { entry, .. } => Ok(FallbackOutcome {
                success: true,
                payload: Some(entry.payload),
                provider_used: Some(entry.metadata.provider),
                mode: FallbackMode::CacheOnly,
                fallback_used: true,
                degraded: false,
                retry_after: None,
            }),
            Lookup::Miss => Ok(FallbackOutcome {
                success: false,
                payload: None,
                provider_used: None,
                mode: FallbackMode::CacheOnly,
                fallback_used: true,
                degraded: false,
                retry_after: None,
            }),
        }
    }

    /// Walk the provider's fallback chain front to back. Each alternate
    /// provider goes through governed dispatch, so a chain member that is
    /// itself exhausted is skipped rather than hammered.
    async fn alternative_api(
        &self,
        request: &ProviderRequest,
        options: &CacheOptions,
    ) -> Result<FallbackOutcome> {
        let chain = self.governor.chain(request.provider);
        for target in chain {
            match target {
                FallbackTarget::CacheOnly => {
                    let outcome = self.cache_only(request, options).await?;
                    if outcome.success {
                        return Ok(outcome);
                    }
                }
                FallbackTarget::Provider(alternate) => {
                    if !self.dispatcher.has_adapter(alternate) {
                        tracing::debug!(
                            alternate = alternate.as_str(),
                            "chain member has no adapter, skipping"
                        );
                        continue;
                    }
                    let retargeted = request.retargeted(alternate);
                    match self.dispatcher.fetch_governed(&retargeted).await {
                        Ok(Dispatch::Fetched(response)) => {
                            return Ok(FallbackOutcome {
                                success: true,
                                payload: Some(response.payload),
                                provider_used: Some(response.provider),
                                mode: FallbackMode::AlternativeApi,
                                fallback_used: true,
                                degraded: false,
                                retry_after: None,
                            });
                        }
                        Ok(Dispatch::Denied(_)) => continue,
                        Err(err) if err.is_transient() => {
                            tracing::warn!(
                                alternate = alternate.as_str(),
                                error = %err,
                                "fallback provider failed, trying next"
                            );
                            continue;
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }
        Ok(self.blocked(request.provider))
    }

    /// Synthetic degraded answer the caller can render while upstream data
    /// is unavailable. Never cached.
    fn degraded(&self, request: &ProviderRequest) -> FallbackOutcome {
        let payload = json!({
            "degraded": true,
            "kind": request.kind.as_str(),
            "message": "live data unavailable, serving reduced answer",
        });
        FallbackOutcome {
            success: true,
            payload: Some(payload),
            provider_used: None,
            mode: FallbackMode::Degraded,
            fallback_used: true,
            degraded: true,
            retry_after: None,
        }
    }

    fn blocked(&self, provider: Provider) -> FallbackOutcome {
        let decision = self.governor.check_request(provider);
        FallbackOutcome::blocked(decision.retry_after)
    }
}
