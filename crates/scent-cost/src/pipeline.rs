//! Generation with graceful degradation
//!
//! ```text
//! request ──► template? (standard quality, kind known) ──► zero-cost text
//!    │
//!    ▼
//! select provider ──BudgetExceeded──► template (BudgetExhausted)
//!    │
//!    ▼
//! reserve ► primary ──fail──► reserve ► fallback ──fail──► template (ProviderFailure)
//!    │         │                 │         │
//!    │         └──ok─────────────┼─────────┴──► settle cost, AI text
//!    └─────────── refused ───────┴──► template (BudgetExhausted)
//! ```
//!
//! Each attempt holds its projected cost in the ledger for the duration of the
//! call, so concurrent generations cannot jointly cross a ceiling.
//!
//! Budget problems never surface as errors; callers always receive text.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{CostError, ProviderError};
use crate::governor::CostGovernor;
use crate::provider::{AiProvider, GenerationRequest, ProviderResponse, Quality};
use crate::selection::{ScoredProvider, WorkloadProfile};
use crate::template::TemplateGenerator;

/// How the text was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationPath {
    /// Deterministic template
    Template,
    /// AI provider
    Ai {
        /// Provider that answered
        provider: String,
    },
}

/// Why a request fell back to a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeReason {
    /// A budget ceiling would be crossed
    BudgetExhausted,
    /// Every attempted provider failed
    ProviderFailure,
    /// No provider met the workload constraints
    NoEligibleProvider,
    /// The caller is shedding load
    Backpressure,
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DegradeReason::BudgetExhausted => "budget_exhausted",
            DegradeReason::ProviderFailure => "provider_failure",
            DegradeReason::NoEligibleProvider => "no_eligible_provider",
            DegradeReason::Backpressure => "backpressure",
        })
    }
}

/// Generated text and its cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    /// Generated text
    pub text: String,
    /// Producer
    pub path: GenerationPath,
    /// Tokens billed
    pub tokens: u64,
    /// Dollar cost
    pub cost_usd: Decimal,
    /// Set when a preferred path was unavailable
    pub degraded: Option<DegradeReason>,
}

impl GenerationOutcome {
    /// Produced by an AI provider
    #[inline]
    #[must_use]
    pub fn is_ai(&self) -> bool {
        matches!(self.path, GenerationPath::Ai { .. })
    }
}

/// Template and provider fallback chain
pub struct GenerationPipeline {
    governor: Arc<CostGovernor>,
    providers: BTreeMap<String, Arc<dyn AiProvider>>,
    templates: TemplateGenerator,
    timeout: Duration,
}

impl fmt::Debug for GenerationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationPipeline")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("templates", &self.templates)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl GenerationPipeline {
    /// Pipeline with default templates and the governor's provider timeout
    #[must_use]
    pub fn new(governor: Arc<CostGovernor>) -> Self {
        let timeout = governor.config().provider_timeout();
        Self {
            governor,
            providers: BTreeMap::new(),
            templates: TemplateGenerator::default(),
            timeout,
        }
    }

    /// Register a provider implementation under its name
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn AiProvider>) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    /// Replace the template set
    #[must_use]
    pub fn with_templates(mut self, templates: TemplateGenerator) -> Self {
        self.templates = templates;
        self
    }

    /// Override the per-call timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Governor recording this pipeline's spend
    #[inline]
    #[must_use]
    pub fn governor(&self) -> &Arc<CostGovernor> {
        &self.governor
    }

    /// Produce text for a request, degrading instead of failing
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationOutcome {
        if request.quality == Quality::Standard && self.templates.has_template(&request.kind) {
            return self.template(request, None);
        }

        let workload = WorkloadProfile::new(request.expected_tokens)
            .with_weights(self.governor.config().selection_weights);
        let selection = match self.governor.select_provider(&workload) {
            Ok(selection) => selection,
            Err(CostError::BudgetExceeded { .. }) => {
                return self.template(request, Some(DegradeReason::BudgetExhausted));
            }
            Err(err) => {
                tracing::warn!(kind = %request.kind, error = %err, "no provider for generation");
                return self.template(request, Some(DegradeReason::NoEligibleProvider));
            }
        };

        let attempts: Vec<&ScoredProvider> = selection.attempts().collect();
        let mut attempted = false;
        for (i, candidate) in attempts.iter().enumerate() {
            let Ok(reservation) = self.governor.reserve(&candidate.name, candidate.projected_cost) else {
                continue;
            };
            attempted = true;
            match self.attempt(&candidate.name, request).await {
                Ok(response) => {
                    let cost = self
                        .governor
                        .settle(reservation, &candidate.name, response.tokens_used)
                        .unwrap_or_else(|err| {
                            tracing::warn!(provider = %candidate.name, error = %err, "usage not recorded");
                            Decimal::ZERO
                        });
                    return GenerationOutcome {
                        text: response.text,
                        path: GenerationPath::Ai {
                            provider: candidate.name.clone(),
                        },
                        tokens: response.tokens_used,
                        cost_usd: cost,
                        degraded: None,
                    };
                }
                Err(err) => {
                    drop(reservation);
                    self.governor.record_failed_attempt(&candidate.name);
                    if let Some(next) = attempts.get(i + 1) {
                        tracing::warn!(
                            provider = %candidate.name,
                            error = %err,
                            next_provider = %next.name,
                            "provider failed, trying fallback"
                        );
                    } else {
                        tracing::warn!(provider = %candidate.name, error = %err, "provider failed");
                    }
                }
            }
        }

        let reason = if attempted {
            DegradeReason::ProviderFailure
        } else {
            DegradeReason::BudgetExhausted
        };
        self.template(request, Some(reason))
    }

    /// Template output for a caller that will not wait for a provider
    #[must_use]
    pub fn template_only(&self, request: &GenerationRequest, reason: DegradeReason) -> GenerationOutcome {
        self.template(request, Some(reason))
    }

    async fn attempt(
        &self,
        name: &str,
        request: &GenerationRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let provider = self
            .providers
            .get(name)
            .ok_or_else(|| ProviderError::Unavailable {
                provider: name.to_string(),
                reason: "no implementation registered".into(),
            })?;

        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, provider.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider: name.to_string(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };
        self.governor.record_ai_metric(
            &request.kind,
            started.elapsed().as_secs_f64() * 1_000.0,
            result.is_ok(),
        );
        result
    }

    fn template(&self, request: &GenerationRequest, degraded: Option<DegradeReason>) -> GenerationOutcome {
        if let Some(reason) = degraded {
            tracing::debug!(kind = %request.kind, reason = %reason, "serving template");
        }
        GenerationOutcome {
            text: self.templates.render(request),
            path: GenerationPath::Template,
            tokens: 0,
            cost_usd: Decimal::ZERO,
            degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetConfig;
    use crate::config::CostConfig;
    use crate::provider::ProviderProfile;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct FixedProvider {
        name: &'static str,
        tokens: u64,
        fail: bool,
        delay: Duration,
    }

    impl FixedProvider {
        fn ok(name: &'static str, tokens: u64) -> Arc<Self> {
            Arc::new(Self {
                name,
                tokens,
                fail: false,
                delay: Duration::ZERO,
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                tokens: 0,
                fail: true,
                delay: Duration::ZERO,
            })
        }

        fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                tokens: 10,
                fail: false,
                delay,
            })
        }
    }

    #[async_trait]
    impl AiProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<ProviderResponse, ProviderError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(ProviderError::Unavailable {
                    provider: self.name.into(),
                    reason: "503".into(),
                });
            }
            Ok(ProviderResponse {
                text: format!("{}: {}", self.name, request.prompt),
                tokens_used: self.tokens,
            })
        }
    }

    fn pipeline(budget: BudgetConfig) -> GenerationPipeline {
        let governor = Arc::new(CostGovernor::new(CostConfig::default().with_budget(budget)).unwrap());
        GenerationPipeline::new(governor)
    }

    fn premium_request() -> GenerationRequest {
        GenerationRequest::new("explanation", "describe")
            .with_quality(Quality::Premium)
            .with_expected_tokens(1_000_000)
    }

    #[tokio::test]
    async fn standard_request_uses_template() {
        let pipeline = pipeline(BudgetConfig::default()).with_provider(FixedProvider::ok("standard", 1));
        let outcome = pipeline
            .generate(&GenerationRequest::new("explanation", "x").with_variable("traits", "fresh"))
            .await;
        assert_eq!(outcome.path, GenerationPath::Template);
        assert_eq!(outcome.cost_usd, Decimal::ZERO);
        assert!(outcome.degraded.is_none());
        assert!(pipeline.governor().ledger().is_empty());
    }

    #[tokio::test]
    async fn premium_request_records_cost() {
        let pipeline = pipeline(BudgetConfig::default())
            .with_provider(FixedProvider::ok("standard", 1_500_000))
            .with_provider(FixedProvider::ok("economy", 1_500_000));
        let outcome = pipeline.generate(&premium_request()).await;
        assert_eq!(
            outcome.path,
            GenerationPath::Ai {
                provider: "standard".into()
            }
        );
        assert_eq!(outcome.cost_usd, dec!(0.27));
        assert_eq!(pipeline.governor().total_cost(), dec!(0.27));
        assert_eq!(pipeline.governor().ai_metrics()[0].operation, "explanation");
    }

    #[tokio::test]
    async fn exhausted_budget_serves_template_at_zero_cost() {
        let pipeline = pipeline(BudgetConfig::default().with_daily(dec!(0.01)))
            .with_provider(FixedProvider::ok("standard", 1_000_000));
        let outcome = pipeline.generate(&premium_request()).await;
        assert_eq!(outcome.path, GenerationPath::Template);
        assert_eq!(outcome.cost_usd, Decimal::ZERO);
        assert_eq!(outcome.degraded, Some(DegradeReason::BudgetExhausted));
        assert_eq!(pipeline.governor().total_cost(), Decimal::ZERO);
        assert_eq!(pipeline.governor().events().budget_exceeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_generations_stay_within_budget() {
        let config = CostConfig::default()
            .with_providers(vec![ProviderProfile::new("standard", dec!(0.18), 0.9, 800)])
            .with_budget(BudgetConfig::default().with_daily(dec!(0.20)));
        let governor = Arc::new(CostGovernor::new(config).unwrap());
        let provider = Arc::new(FixedProvider {
            name: "standard",
            tokens: 1_000_000,
            fail: false,
            delay: Duration::from_millis(50),
        });
        let pipeline = Arc::new(GenerationPipeline::new(Arc::clone(&governor)).with_provider(provider));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move { pipeline.generate(&premium_request()).await })
            })
            .collect();
        let mut ai = 0;
        for handle in handles {
            let outcome = handle.await.unwrap();
            if outcome.is_ai() {
                ai += 1;
            } else {
                assert_eq!(outcome.degraded, Some(DegradeReason::BudgetExhausted));
                assert_eq!(outcome.cost_usd, Decimal::ZERO);
            }
        }

        assert_eq!(ai, 1);
        assert_eq!(governor.total_cost(), dec!(0.18));
        assert_eq!(governor.ledger().reserved(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn failed_attempt_releases_its_reservation() {
        // standard holds 0.18 of 0.20; economy (0.05) only fits once it is released
        let pipeline = pipeline(BudgetConfig::default().with_daily(dec!(0.20)))
            .with_provider(FixedProvider::failing("standard"))
            .with_provider(FixedProvider::ok("economy", 1_000_000));

        let outcome = pipeline.generate(&premium_request()).await;
        assert_eq!(
            outcome.path,
            GenerationPath::Ai {
                provider: "economy".into()
            }
        );
        let governor = pipeline.governor();
        assert_eq!(governor.total_cost(), dec!(0.05));
        assert_eq!(governor.ledger().reserved(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn failed_primary_falls_back_with_zero_cost_attempt() {
        let pipeline = pipeline(BudgetConfig::default())
            .with_provider(FixedProvider::failing("standard"))
            .with_provider(FixedProvider::ok("economy", 1_000_000));
        let outcome = pipeline.generate(&premium_request()).await;
        assert_eq!(
            outcome.path,
            GenerationPath::Ai {
                provider: "economy".into()
            }
        );
        assert_eq!(outcome.cost_usd, dec!(0.05));

        let failed = pipeline.governor().provider_totals("standard");
        assert_eq!(failed.calls, 1);
        assert_eq!(failed.cost_usd, Decimal::ZERO);
        assert_eq!(pipeline.governor().events().failed_attempts, 1);
    }

    #[tokio::test]
    async fn all_providers_failing_serves_template() {
        let pipeline = pipeline(BudgetConfig::default())
            .with_provider(FixedProvider::failing("standard"))
            .with_provider(FixedProvider::failing("economy"));
        let outcome = pipeline.generate(&premium_request()).await;
        assert_eq!(outcome.degraded, Some(DegradeReason::ProviderFailure));
        assert_eq!(pipeline.governor().total_cost(), Decimal::ZERO);
        assert_eq!(pipeline.governor().events().failed_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let pipeline = pipeline(BudgetConfig::default())
            .with_provider(FixedProvider::slow("standard", Duration::from_secs(10)))
            .with_provider(FixedProvider::ok("economy", 100))
            .with_timeout(Duration::from_millis(100));
        let outcome = pipeline.generate(&premium_request()).await;
        assert!(outcome.is_ai());
        assert_eq!(
            outcome.path,
            GenerationPath::Ai {
                provider: "economy".into()
            }
        );
        assert_eq!(pipeline.governor().provider_totals("standard").cost_usd, Decimal::ZERO);
    }

    #[test]
    fn template_only_marks_reason() {
        let pipeline = pipeline(BudgetConfig::default());
        let outcome = pipeline.template_only(&premium_request(), DegradeReason::Backpressure);
        assert_eq!(outcome.degraded, Some(DegradeReason::Backpressure));
        assert_eq!(outcome.tokens, 0);
    }
}
