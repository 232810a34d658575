//! AI provider profiles and the provider contract

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ProviderError;

const TOKENS_PER_MILLION: u64 = 1_000_000;

/// Pricing and quality characteristics of a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderProfile {
    /// Unique provider name
    pub name: String,
    /// USD per one million tokens
    pub cost_per_million_tokens: Decimal,
    /// Expected output quality in `[0, 1]`
    pub accuracy: f64,
    /// Typical response latency
    pub avg_latency_ms: u64,
    /// Whether the provider may be selected
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool {
    true
}

impl ProviderProfile {
    /// Enabled provider
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        cost_per_million_tokens: Decimal,
        accuracy: f64,
        avg_latency_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            cost_per_million_tokens,
            accuracy,
            avg_latency_ms,
            enabled: true,
        }
    }

    /// Set the enabled flag
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Exact cost of `tokens` at this provider's rate
    #[inline]
    #[must_use]
    pub fn price(&self, tokens: u64) -> Decimal {
        Decimal::from(tokens) * self.cost_per_million_tokens / Decimal::from(TOKENS_PER_MILLION)
    }
}

/// Requested output quality
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// Template output is acceptable
    #[default]
    Standard,
    /// AI output preferred while budget allows
    Premium,
}

/// Text generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Template family, e.g. `explanation`
    pub kind: String,
    /// Prompt sent to AI providers
    pub prompt: String,
    /// Values substituted into templates
    pub variables: BTreeMap<String, String>,
    /// Token estimate used for cost projection
    pub expected_tokens: u64,
    /// Requested quality
    pub quality: Quality,
}

impl GenerationRequest {
    /// Standard-quality request
    #[must_use]
    pub fn new(kind: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            prompt: prompt.into(),
            variables: BTreeMap::new(),
            expected_tokens: 400,
            quality: Quality::Standard,
        }
    }

    /// Add a template variable
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Set the token estimate
    #[must_use]
    pub fn with_expected_tokens(mut self, tokens: u64) -> Self {
        self.expected_tokens = tokens;
        self
    }

    /// Set the quality
    #[must_use]
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }
}

/// Completed provider response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Generated text
    pub text: String,
    /// Tokens billed
    pub tokens_used: u64,
}

/// An AI text generation provider
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Name matching a [`ProviderProfile`]
    fn name(&self) -> &str;

    /// Generate text for a request
    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_is_exact() {
        let provider = ProviderProfile::new("standard", dec!(0.18), 0.9, 800);
        assert_eq!(provider.price(1_500_000), dec!(0.27));
        assert_eq!(provider.price(0), Decimal::ZERO);
    }

    #[test]
    fn profile_deserializes_with_default_enabled() {
        let json = r#"{"name":"economy","cost_per_million_tokens":"0.05","accuracy":0.8,"avg_latency_ms":500}"#;
        let profile: ProviderProfile = serde_json::from_str(json).unwrap();
        assert!(profile.enabled);
        assert_eq!(profile.cost_per_million_tokens, dec!(0.05));
    }
}
