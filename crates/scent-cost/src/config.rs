//! Cost governor configuration

use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::anomaly::AnomalyConfig;
use crate::budget::BudgetConfig;
use crate::error::CostError;
use crate::ledger::DEFAULT_RETENTION_DAYS;
use crate::provider::ProviderProfile;
use crate::selection::SelectionWeights;

/// Everything the governor and pipeline need
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Registered providers
    pub providers: Vec<ProviderProfile>,
    /// Spend ceilings
    pub budget: BudgetConfig,
    /// Spike detection
    pub anomaly: AnomalyConfig,
    /// Timeout per provider call
    pub provider_timeout_ms: u64,
    /// Days individual cost records are retained
    pub retention_days: i64,
    /// Default scoring weights for provider selection
    pub selection_weights: SelectionWeights,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            budget: BudgetConfig::default(),
            anomaly: AnomalyConfig::default(),
            provider_timeout_ms: 2_000,
            retention_days: DEFAULT_RETENTION_DAYS,
            selection_weights: SelectionWeights::default(),
        }
    }
}

fn default_providers() -> Vec<ProviderProfile> {
    vec![
        ProviderProfile::new("premium", dec!(0.60), 0.95, 1_500),
        ProviderProfile::new("standard", dec!(0.18), 0.90, 800),
        ProviderProfile::new("economy", dec!(0.05), 0.60, 400),
    ]
}

impl CostConfig {
    /// Replace the provider list
    #[must_use]
    pub fn with_providers(mut self, providers: Vec<ProviderProfile>) -> Self {
        self.providers = providers;
        self
    }

    /// Replace the budget
    #[must_use]
    pub fn with_budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    /// Set the provider timeout
    #[must_use]
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Provider timeout as a duration
    #[inline]
    #[must_use]
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), CostError> {
        let mut names = BTreeSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(CostError::InvalidConfig("provider name is empty".into()));
            }
            if !names.insert(provider.name.as_str()) {
                return Err(CostError::InvalidConfig(format!(
                    "duplicate provider: {}",
                    provider.name
                )));
            }
            if provider.cost_per_million_tokens.is_sign_negative() {
                return Err(CostError::InvalidConfig(format!(
                    "provider {} has a negative rate",
                    provider.name
                )));
            }
            if !(0.0..=1.0).contains(&provider.accuracy) {
                return Err(CostError::InvalidConfig(format!(
                    "provider {} accuracy must be in [0, 1]",
                    provider.name
                )));
            }
        }
        self.budget.validate()?;
        if self.provider_timeout_ms == 0 {
            return Err(CostError::InvalidConfig(
                "provider_timeout_ms must be positive".into(),
            ));
        }
        if self.retention_days <= 0 {
            return Err(CostError::InvalidConfig(
                "retention_days must be positive".into(),
            ));
        }
        if self.anomaly.sample_window_secs <= 0
            || self.anomaly.baseline_window_secs < self.anomaly.sample_window_secs
        {
            return Err(CostError::InvalidConfig(
                "anomaly baseline must span at least one positive sample window".into(),
            ));
        }
        if self.anomaly.spike_multiplier <= 1.0 {
            return Err(CostError::InvalidConfig(
                "spike_multiplier must exceed 1.0".into(),
            ));
        }
        Ok(())
    }
}
