//! Provider limit, budget and fallback-chain configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{GeogateError, Result};
use crate::types::{FallbackTarget, Provider};

/// Rate limits for one provider, in its own quota windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProviderLimits {
    pub per_second: u32,
    pub hourly: u32,
    pub daily: u32,
    /// Estimated EUR per request, for budget projections.
    pub cost_per_request: f64,
}

impl ProviderLimits {
    /// Published defaults per provider, used until probing or an operator
    /// says otherwise.
    pub fn defaults_for(provider: Provider) -> Self {
        match provider {
            Provider::GoogleMaps => ProviderLimits {
                per_second: 50,
                hourly: 2_500,
                daily: 25_000,
                cost_per_request: 0.005,
            },
            // Nominatim's usage policy is strictly one request per second.
            Provider::Nominatim => ProviderLimits {
                per_second: 1,
                hourly: 3_600,
                daily: 86_400,
                cost_per_request: 0.0,
            },
            Provider::OpenRouteService => ProviderLimits {
                per_second: 5,
                hourly: 500,
                daily: 2_000,
                cost_per_request: 0.0,
            },
        }
    }
}

/// Monthly spend budget and the crisis limits applied when it is nearly
/// exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProviderBudget {
    /// Monthly spend ceiling in EUR. Zero disables budget monitoring.
    pub monthly: f64,
    pub emergency_daily: u32,
    pub emergency_hourly: u32,
}

impl ProviderBudget {
    pub fn defaults_for(provider: Provider) -> Self {
        match provider {
            Provider::GoogleMaps => ProviderBudget {
                monthly: 200.0,
                emergency_daily: 1_000,
                emergency_hourly: 100,
            },
            Provider::Nominatim | Provider::OpenRouteService => ProviderBudget {
                monthly: 0.0,
                emergency_daily: 0,
                emergency_hourly: 0,
            },
        }
    }
}

/// Complete limits configuration: limits, budgets and fallback chains per
/// provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub limits: HashMap<Provider, ProviderLimits>,
    pub budgets: HashMap<Provider, ProviderBudget>,
    /// Ordered fallback chain per provider; walked front to back.
    pub chains: HashMap<Provider, Vec<FallbackTarget>>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let mut limits = HashMap::new();
        let mut budgets = HashMap::new();
        for provider in Provider::ALL {
            limits.insert(provider, ProviderLimits::defaults_for(provider));
            budgets.insert(provider, ProviderBudget::defaults_for(provider));
        }

        let mut chains = HashMap::new();
        chains.insert(
            Provider::GoogleMaps,
            vec![
                FallbackTarget::Provider(Provider::OpenRouteService),
                FallbackTarget::Provider(Provider::Nominatim),
            ],
        );
        chains.insert(Provider::Nominatim, vec![FallbackTarget::CacheOnly]);
        chains.insert(
            Provider::OpenRouteService,
            vec![FallbackTarget::Provider(Provider::Nominatim)],
        );

        Self {
            limits,
            budgets,
            chains,
        }
    }
}

impl LimitsConfig {
    /// Validate internal consistency. Called once at build time so every
    /// later lookup can trust the tables.
    pub fn validate(&self) -> Result<()> {
        for provider in Provider::ALL {
            let limits = self.limits.get(&provider).ok_or_else(|| {
                GeogateError::Configuration(format!("missing limits for {provider}"))
            })?;
            if limits.per_second == 0 || limits.hourly == 0 || limits.daily == 0 {
                return Err(GeogateError::Configuration(format!(
                    "limits for {provider} must be positive"
                )));
            }
            if limits.cost_per_request < 0.0 {
                return Err(GeogateError::Configuration(format!(
                    "cost per request for {provider} must not be negative"
                )));
            }
        }

        for (provider, chain) in &self.chains {
            let mut seen = Vec::new();
            for target in chain {
                if *target == FallbackTarget::Provider(*provider) {
                    return Err(GeogateError::Configuration(format!(
                        "fallback chain for {provider} references itself"
                    )));
                }
                if seen.contains(target) {
                    return Err(GeogateError::Configuration(format!(
                        "fallback chain for {provider} lists {target} twice"
                    )));
                }
                seen.push(*target);
            }
        }
        Ok(())
    }

    pub fn limits_for(&self, provider: Provider) -> ProviderLimits {
        self.limits
            .get(&provider)
            .copied()
            .unwrap_or_else(|| ProviderLimits::defaults_for(provider))
    }

    pub fn budget_for(&self, provider: Provider) -> ProviderBudget {
        self.budgets
            .get(&provider)
            .copied()
            .unwrap_or_else(|| ProviderBudget::defaults_for(provider))
    }

    pub fn chain_for(&self, provider: Provider) -> Vec<FallbackTarget> {
        self.chains.get(&provider).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        LimitsConfig::default().validate().unwrap();
    }

    #[test]
    fn self_referencing_chain_is_rejected() {
        let mut config = LimitsConfig::default();
        config.chains.insert(
            Provider::GoogleMaps,
            vec![FallbackTarget::Provider(Provider::GoogleMaps)],
        );
        assert!(matches!(
            config.validate(),
            Err(GeogateError::Configuration(_))
        ));
    }

    #[test]
    fn duplicate_chain_target_is_rejected() {
        let mut config = LimitsConfig::default();
        config.chains.insert(
            Provider::GoogleMaps,
            vec![
                FallbackTarget::Provider(Provider::Nominatim),
                FallbackTarget::Provider(Provider::Nominatim),
            ],
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_limit_is_rejected() {
        let mut config = LimitsConfig::default();
        if let Some(limits) = config.limits.get_mut(&Provider::Nominatim) {
            limits.daily = 0;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = LimitsConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: LimitsConfig = serde_json::from_str(&json).unwrap();
        back.validate().unwrap();
        assert_eq!(
            back.chain_for(Provider::Nominatim),
            vec![FallbackTarget::CacheOnly]
        );
    }
}
