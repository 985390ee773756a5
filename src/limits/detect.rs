//! Automatic detection of published provider limit changes.
//!
//! Providers change their quotas and pricing without telling anyone.
//! Probes poll authoritative sources (cloud consoles, pricing APIs,
//! policy pages) and report what they see; observations from multiple
//! sources are combined into a confidence score. High-confidence changes
//! apply automatically with an audit trail, lower-confidence ones raise
//! an alert for an operator to confirm.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use crate::error::Result;
use crate::limits::config::ProviderLimits;
use crate::limits::QuotaGovernor;
use crate::traits::{Alert, AlertKind, AlertSink};
use crate::types::Provider;

/// Confidence at or above which a detected change applies automatically.
pub const AUTO_UPDATE_CONFIDENCE: f64 = 0.8;
/// Bonus when two or more independent sources report a change.
const MULTI_SOURCE_BONUS: f64 = 0.1;

/// Actor name recorded in the audit trail for automatic updates.
const DETECTOR_ACTOR: &str = "limit-change-detector";

/// Limits as observed by one probe. Fields a source does not publish stay
/// `None` and never count for or against a change.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ProbedLimits {
    pub per_second: Option<u32>,
    pub hourly: Option<u32>,
    pub daily: Option<u32>,
    pub cost_per_request: Option<f64>,
}

impl ProbedLimits {
    fn is_empty(&self) -> bool {
        self.per_second.is_none()
            && self.hourly.is_none()
            && self.daily.is_none()
            && self.cost_per_request.is_none()
    }
}

/// One source of published limit information.
#[async_trait]
pub trait QuotaProbe: Send + Sync {
    /// Stable source name, e.g. `google_cloud_console`.
    fn source(&self) -> &str;

    /// Trustworthiness of this source in [0, 1].
    fn weight(&self) -> f64;

    /// Fetch the currently published limits for `provider`. `Ok(None)`
    /// means the source has nothing to say about this provider.
    async fn probe(&self, provider: Provider) -> Result<Option<ProbedLimits>>;
}

/// Probe that reads limits from an HTTP endpoint returning JSON with
/// optional `per_second` / `hourly` / `daily` / `cost_per_request` fields.
pub struct HttpQuotaProbe {
    source: String,
    weight: f64,
    base_url: String,
    client: reqwest::Client,
}

impl HttpQuotaProbe {
    pub fn new(source: impl Into<String>, weight: f64, base_url: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            weight,
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn google_cloud_console(base_url: impl Into<String>) -> Self {
        Self::new("google_cloud_console", 0.95, base_url)
    }

    pub fn pricing_api(base_url: impl Into<String>) -> Self {
        Self::new("pricing_api", 0.9, base_url)
    }

    pub fn osm_policy_page(base_url: impl Into<String>) -> Self {
        Self::new("osm_policy_page", 0.8, base_url)
    }

    pub fn ors_api_status(base_url: impl Into<String>) -> Self {
        Self::new("ors_api_status", 0.85, base_url)
    }
}

#[async_trait]
impl QuotaProbe for HttpQuotaProbe {
    fn source(&self) -> &str {
        &self.source
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    async fn probe(&self, provider: Provider) -> Result<Option<ProbedLimits>> {
        let url = format!("{}/quotas/{}", self.base_url, provider.as_str());
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let probed: ProbedLimits = response.json().await?;
        if probed.is_empty() {
            return Ok(None);
        }
        Ok(Some(probed))
    }
}

/// A change proposal assembled from probe observations.
#[derive(Debug, Clone)]
pub struct DetectedChange {
    pub provider: Provider,
    pub proposed: ProviderLimits,
    pub confidence: f64,
    pub sources: Vec<String>,
    pub applied: bool,
}

pub struct LimitChangeDetector {
    governor: Arc<QuotaGovernor>,
    probes: Vec<Arc<dyn QuotaProbe>>,
    alerts: Arc<dyn AlertSink>,
}

struct Observation {
    source: String,
    weight: f64,
    probed: ProbedLimits,
}

impl LimitChangeDetector {
    pub fn new(
        governor: Arc<QuotaGovernor>,
        probes: Vec<Arc<dyn QuotaProbe>>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            governor,
            probes,
            alerts,
        }
    }

    /// Poll every probe for every provider and act on detected changes.
    /// Idempotent: once limits match the published values, re-running
    /// detects nothing.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<Vec<DetectedChange>> {
        let mut changes = Vec::new();
        for provider in Provider::ALL {
            let mut observations = Vec::new();
            for probe in &self.probes {
                match probe.probe(provider).await {
                    Ok(Some(probed)) => observations.push(Observation {
                        source: probe.source().to_string(),
                        weight: probe.weight(),
                        probed,
                    }),
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(
                            source = probe.source(),
                            provider = provider.as_str(),
                            error = %err,
                            "quota probe failed"
                        );
                    }
                }
            }
            if let Some(change) = self.evaluate(provider, &observations)? {
                changes.push(change);
            }
        }
        Ok(changes)
    }

    /// Merge observations into a proposal and score it.
    fn evaluate(
        &self,
        provider: Provider,
        observations: &[Observation],
    ) -> Result<Option<DetectedChange>> {
        let current = self.governor.limits(provider);
        let mut proposed = current;
        let mut change_weights: Vec<f64> = Vec::new();
        let mut sources: Vec<String> = Vec::new();

        for obs in observations {
            let mut observed_change = false;
            if let Some(per_second) = obs.probed.per_second {
                if per_second != current.per_second {
                    proposed.per_second = per_second;
                    observed_change = true;
                }
            }
            if let Some(hourly) = obs.probed.hourly {
                if hourly != current.hourly {
                    proposed.hourly = hourly;
                    observed_change = true;
                }
            }
            if let Some(daily) = obs.probed.daily {
                if daily != current.daily {
                    proposed.daily = daily;
                    observed_change = true;
                }
            }
            if let Some(cost) = obs.probed.cost_per_request {
                if (cost - current.cost_per_request).abs() > f64::EPSILON {
                    proposed.cost_per_request = cost;
                    observed_change = true;
                }
            }
            if observed_change {
                change_weights.push(obs.weight);
                sources.push(obs.source.clone());
            }
        }

        if change_weights.is_empty() {
            return Ok(None);
        }

        let mut confidence =
            change_weights.iter().sum::<f64>() / change_weights.len() as f64;
        if sources.len() >= 2 {
            confidence += MULTI_SOURCE_BONUS;
        }
        let confidence = confidence.min(1.0);

        let applied = confidence >= AUTO_UPDATE_CONFIDENCE;
        if applied {
            self.governor
                .update_limits(provider, proposed, DETECTOR_ACTOR)?;
            self.alerts.notify(Alert {
                kind: AlertKind::LimitsAutoUpdated,
                provider,
                message: format!(
                    "{provider}: limits auto-updated (confidence {confidence:.2})"
                ),
                payload: json!({
                    "confidence": confidence,
                    "sources": sources,
                    "new": proposed,
                }),
            });
        } else {
            self.alerts.notify(Alert {
                kind: AlertKind::LimitChangeDetected,
                provider,
                message: format!(
                    "{provider}: possible limit change needs confirmation (confidence {confidence:.2})"
                ),
                payload: json!({
                    "confidence": confidence,
                    "sources": sources,
                    "proposed": proposed,
                    "current": current,
                }),
            });
        }

        Ok(Some(DetectedChange {
            provider,
            proposed,
            confidence,
            sources,
            applied,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::config::LimitsConfig;
    use crate::traits::{MemoryAlertSink, MemoryAuditLog};
    use crate::usage::UsageCounter;

    struct FixedProbe {
        source: &'static str,
        weight: f64,
        probed: Option<ProbedLimits>,
    }

    #[async_trait]
    impl QuotaProbe for FixedProbe {
        fn source(&self) -> &str {
            self.source
        }
        fn weight(&self) -> f64 {
            self.weight
        }
        async fn probe(&self, provider: Provider) -> Result<Option<ProbedLimits>> {
            if provider == Provider::GoogleMaps {
                Ok(self.probed)
            } else {
                Ok(None)
            }
        }
    }

    fn detector_with(
        probes: Vec<Arc<dyn QuotaProbe>>,
    ) -> (LimitChangeDetector, Arc<QuotaGovernor>, Arc<MemoryAlertSink>) {
        let alerts = Arc::new(MemoryAlertSink::new());
        let governor = Arc::new(QuotaGovernor::new(
            Arc::new(UsageCounter::new()),
            LimitsConfig::default(),
            Arc::clone(&alerts) as Arc<dyn AlertSink>,
            Arc::new(MemoryAuditLog::new()),
        ));
        let detector = LimitChangeDetector::new(
            Arc::clone(&governor),
            probes,
            Arc::clone(&alerts) as Arc<dyn AlertSink>,
        );
        (detector, governor, alerts)
    }

    #[tokio::test]
    async fn high_confidence_change_applies_automatically() {
        let probe = Arc::new(FixedProbe {
            source: "google_cloud_console",
            weight: 0.95,
            probed: Some(ProbedLimits {
                daily: Some(20_000),
                ..Default::default()
            }),
        });
        let (detector, governor, alerts) = detector_with(vec![probe]);

        let changes = detector.run().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].applied);
        assert_eq!(governor.limits(Provider::GoogleMaps).daily, 20_000);
        assert!(alerts
            .snapshot()
            .iter()
            .any(|a| a.kind == AlertKind::LimitsAutoUpdated));
    }

    #[tokio::test]
    async fn low_confidence_change_requires_confirmation() {
        let probe = Arc::new(FixedProbe {
            source: "unknown_blog_post",
            weight: 0.5,
            probed: Some(ProbedLimits {
                daily: Some(15_000),
                ..Default::default()
            }),
        });
        let (detector, governor, alerts) = detector_with(vec![probe]);

        let changes = detector.run().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert!(!changes[0].applied);
        // Limits unchanged until an operator confirms.
        assert_eq!(governor.limits(Provider::GoogleMaps).daily, 25_000);
        assert!(alerts
            .snapshot()
            .iter()
            .any(|a| a.kind == AlertKind::LimitChangeDetected));
    }

    #[tokio::test]
    async fn multiple_sources_raise_confidence() {
        let a: Arc<dyn QuotaProbe> = Arc::new(FixedProbe {
            source: "osm_policy_page",
            weight: 0.7,
            probed: Some(ProbedLimits {
                daily: Some(30_000),
                ..Default::default()
            }),
        });
        let b: Arc<dyn QuotaProbe> = Arc::new(FixedProbe {
            source: "pricing_api",
            weight: 0.75,
            probed: Some(ProbedLimits {
                daily: Some(30_000),
                ..Default::default()
            }),
        });
        // Individually 0.7 and 0.75 sit below the auto threshold; the
        // multi-source bonus lifts the combined score over it.
        let (detector, governor, _) = detector_with(vec![a, b]);
        let changes = detector.run().await.unwrap();
        assert!(changes[0].applied);
        assert!((changes[0].confidence - 0.825).abs() < 1e-9);
        assert_eq!(governor.limits(Provider::GoogleMaps).daily, 30_000);
    }

    #[tokio::test]
    async fn confidence_threshold_is_inclusive() {
        // A single source of exactly weight 0.8 sits on the auto-update
        // boundary and applies.
        let probe = Arc::new(FixedProbe {
            source: "osm_policy_page",
            weight: 0.8,
            probed: Some(ProbedLimits {
                hourly: Some(2_000),
                ..Default::default()
            }),
        });
        let (detector, governor, _) = detector_with(vec![probe]);
        let changes = detector.run().await.unwrap();
        assert!(changes[0].applied);
        assert_eq!(governor.limits(Provider::GoogleMaps).hourly, 2_000);
    }

    #[tokio::test]
    async fn detection_is_idempotent_once_applied() {
        let probe = Arc::new(FixedProbe {
            source: "google_cloud_console",
            weight: 0.95,
            probed: Some(ProbedLimits {
                daily: Some(20_000),
                ..Default::default()
            }),
        });
        let (detector, _, _) = detector_with(vec![probe]);

        let first = detector.run().await.unwrap();
        assert_eq!(first.len(), 1);
        let second = detector.run().await.unwrap();
        assert!(second.is_empty());
    }
}
