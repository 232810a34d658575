//! Cost governor
//!
//! Owns the ledger, the provider fleet and budget enforcement. Every priced
//! call goes through [`CostGovernor::record_usage`]; every selection goes
//! through [`CostGovernor::select_provider`], which never returns a provider
//! whose projected cost would cross a budget ceiling.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::anomaly::{self, CostAnomaly};
use crate::config::CostConfig;
use crate::error::CostError;
use crate::ledger::{CostLedger, CostRecord, ProviderTotals, Reservation, Window};
use crate::metrics::{AiMetrics, MonthlyEstimate, MonthlyEstimateParams, OperationMetrics, TokenUsage};
use crate::provider::ProviderProfile;
use crate::selection::{self, ProviderSelection, WorkloadProfile};

const DAYS_PER_MONTH: u64 = 30;

/// Counters of cost events, read by the health monitor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEvents {
    /// Budget checks that failed
    pub budget_exceeded: u64,
    /// Detection passes that found a spike
    pub anomalies: u64,
    /// Provider attempts that failed
    pub failed_attempts: u64,
}

/// Ledger, budgets and provider selection
#[derive(Debug)]
pub struct CostGovernor {
    config: CostConfig,
    providers: RwLock<Vec<ProviderProfile>>,
    ledger: CostLedger,
    metrics: AiMetrics,
    budget_exceeded: AtomicU64,
    anomalies: AtomicU64,
    failed_attempts: AtomicU64,
}

impl CostGovernor {
    /// Governor over a validated configuration
    pub fn new(config: CostConfig) -> Result<Self, CostError> {
        config.validate()?;
        Ok(Self {
            providers: RwLock::new(config.providers.clone()),
            ledger: CostLedger::new(Duration::days(config.retention_days)),
            metrics: AiMetrics::new(),
            budget_exceeded: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            failed_attempts: AtomicU64::new(0),
            config,
        })
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CostConfig {
        &self.config
    }

    /// Underlying ledger
    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    /// Current provider profiles
    #[must_use]
    pub fn providers(&self) -> Vec<ProviderProfile> {
        self.providers.read().clone()
    }

    /// Profile of one provider
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<ProviderProfile> {
        self.providers.read().iter().find(|p| p.name == name).cloned()
    }

    /// Enable or disable a provider for selection
    pub fn set_provider_enabled(&self, name: &str, enabled: bool) -> Result<(), CostError> {
        let mut providers = self.providers.write();
        let provider = providers
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| CostError::UnknownProvider(name.to_string()))?;
        if provider.enabled != enabled {
            tracing::info!(provider = %name, enabled, "provider availability changed");
        }
        provider.enabled = enabled;
        Ok(())
    }

    /// Price and record a completed call now
    pub fn record_usage(&self, provider: &str, tokens: u64) -> Result<Decimal, CostError> {
        self.record_usage_at(provider, tokens, Utc::now())
    }

    /// Price and record a completed call at `timestamp`
    pub fn record_usage_at(
        &self,
        provider: &str,
        tokens: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<Decimal, CostError> {
        let cost = self
            .provider(provider)
            .ok_or_else(|| CostError::UnknownProvider(provider.to_string()))?
            .price(tokens);
        self.ledger.append(CostRecord {
            provider: provider.to_string(),
            tokens,
            cost_usd: cost,
            timestamp,
        });
        tracing::debug!(provider = %provider, tokens, cost = %cost, "usage recorded");
        Ok(cost)
    }

    /// Hold `projected` against the budget for a call about to start
    ///
    /// The check and the hold are atomic; concurrent callers see each other's
    /// holds. Drop the reservation if the call fails.
    pub fn reserve(&self, provider: &str, projected: Decimal) -> Result<Reservation<'_>, CostError> {
        let result = self.config.budget.reserve(&self.ledger, projected, Utc::now());
        match &result {
            Ok(_) => tracing::debug!(provider = %provider, projected = %projected, "budget reserved"),
            Err(err) => {
                self.budget_exceeded.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(provider = %provider, error = %err, "budget reservation refused");
            }
        }
        result
    }

    /// Price a completed call and swap its reservation for the actual cost
    pub fn settle(
        &self,
        reservation: Reservation<'_>,
        provider: &str,
        tokens: u64,
    ) -> Result<Decimal, CostError> {
        let cost = self
            .provider(provider)
            .ok_or_else(|| CostError::UnknownProvider(provider.to_string()))?
            .price(tokens);
        if cost > reservation.amount() {
            tracing::warn!(
                provider = %provider,
                reserved = %reservation.amount(),
                cost = %cost,
                "call cost more than reserved"
            );
        }
        reservation.settle(CostRecord {
            provider: provider.to_string(),
            tokens,
            cost_usd: cost,
            timestamp: Utc::now(),
        });
        tracing::debug!(provider = %provider, tokens, cost = %cost, "usage recorded");
        Ok(cost)
    }

    /// Record a failed provider attempt at zero cost
    pub fn record_failed_attempt(&self, provider: &str) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
        self.ledger.append(CostRecord {
            provider: provider.to_string(),
            tokens: 0,
            cost_usd: Decimal::ZERO,
            timestamp: Utc::now(),
        });
    }

    /// Lifetime spend across providers
    #[must_use]
    pub fn total_cost(&self) -> Decimal {
        self.ledger.total_cost()
    }

    /// Lifetime totals of one provider
    #[must_use]
    pub fn provider_totals(&self, provider: &str) -> ProviderTotals {
        self.ledger.provider_totals(provider)
    }

    /// Spend in a rolling window ending now
    #[must_use]
    pub fn spend(&self, window: Window) -> Decimal {
        self.ledger.spend_in(window, Utc::now())
    }

    /// Fail when `projected` more spend would cross a ceiling
    pub fn check_budget(&self, projected: Decimal) -> Result<(), CostError> {
        self.check_budget_at(projected, Utc::now())
    }

    /// [`Self::check_budget`] at a fixed instant
    pub fn check_budget_at(&self, projected: Decimal, now: DateTime<Utc>) -> Result<(), CostError> {
        let result = self.config.budget.check(&self.ledger, projected, now);
        if let Err(err) = &result {
            self.budget_exceeded.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %err, "budget check failed");
        }
        result
    }

    /// Smallest headroom across configured ceilings
    #[must_use]
    pub fn remaining_budget(&self) -> Option<Decimal> {
        self.config.budget.remaining(&self.ledger, Utc::now())
    }

    /// Highest spend-to-ceiling ratio across windows
    #[must_use]
    pub fn budget_utilization(&self) -> f64 {
        self.config.budget.utilization(&self.ledger, Utc::now())
    }

    /// Best affordable provider for a workload, plus a fallback
    pub fn select_provider(&self, workload: &WorkloadProfile) -> Result<ProviderSelection, CostError> {
        self.select_provider_at(workload, Utc::now())
    }

    /// [`Self::select_provider`] at a fixed instant
    pub fn select_provider_at(
        &self,
        workload: &WorkloadProfile,
        now: DateTime<Utc>,
    ) -> Result<ProviderSelection, CostError> {
        let ranked = selection::rank(&self.providers.read(), workload);
        if ranked.is_empty() {
            return Err(CostError::NoEligibleProvider(format!(
                "none meets accuracy >= {} and latency <= {}ms",
                workload.min_accuracy, workload.max_latency_ms
            )));
        }

        let mut affordable = ranked
            .iter()
            .filter(|p| {
                self.config
                    .budget
                    .check(&self.ledger, p.projected_cost, now)
                    .is_ok()
            })
            .cloned();
        if let Some(primary) = affordable.next() {
            let fallback = affordable.next();
            tracing::debug!(
                primary = %primary.name,
                fallback = ?fallback.as_ref().map(|f| f.name.as_str()),
                "provider selected"
            );
            return Ok(ProviderSelection { primary, fallback });
        }

        let cheapest = ranked
            .iter()
            .map(|p| p.projected_cost)
            .min()
            .unwrap_or(Decimal::ZERO);
        self.check_budget_at(cheapest, now)?;
        Err(CostError::NoEligibleProvider("no provider fits the budget".into()))
    }

    /// Compare recent spend with the trailing baseline
    pub fn detect_anomaly(&self, now: DateTime<Utc>) -> CostAnomaly {
        let anomaly = anomaly::detect(&self.ledger, &self.config.anomaly, now);
        if anomaly.is_spike {
            self.anomalies.fetch_add(1, Ordering::Relaxed);
        }
        anomaly
    }

    /// Record one AI operation
    pub fn record_ai_metric(&self, operation: &str, latency_ms: f64, success: bool) {
        self.metrics.record(operation, latency_ms, success);
    }

    /// Metrics of every AI operation
    #[must_use]
    pub fn ai_metrics(&self) -> Vec<OperationMetrics> {
        self.metrics.snapshot()
    }

    /// Tokens and spend over the last 24 hours
    #[must_use]
    pub fn daily_token_usage(&self) -> TokenUsage {
        self.daily_token_usage_at(Utc::now())
    }

    /// [`Self::daily_token_usage`] at a fixed instant
    #[must_use]
    pub fn daily_token_usage_at(&self, now: DateTime<Utc>) -> TokenUsage {
        let by_provider = self.ledger.tokens_between(now - Window::Day.duration(), now);
        TokenUsage {
            total: by_provider.values().sum(),
            by_provider,
            cost_usd: self.ledger.spend_in(Window::Day, now),
        }
    }

    /// Project a 30-day bill for a steady request rate
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn estimate_monthly_cost(
        &self,
        params: &MonthlyEstimateParams,
    ) -> Result<MonthlyEstimate, CostError> {
        let provider = self
            .provider(&params.provider)
            .ok_or_else(|| CostError::UnknownProvider(params.provider.clone()))?;
        let miss_rate = 1.0 - params.cache_hit_rate.clamp(0.0, 1.0);
        let billable_daily = (params.daily_requests as f64 * miss_rate).round() as u64;
        let daily_tokens = billable_daily.saturating_mul(params.avg_tokens_per_request);
        let daily_cost = provider.price(daily_tokens);

        Ok(MonthlyEstimate {
            provider: provider.name,
            billable_requests: billable_daily.saturating_mul(DAYS_PER_MONTH),
            tokens: daily_tokens.saturating_mul(DAYS_PER_MONTH),
            daily_cost_usd: daily_cost,
            monthly_cost_usd: daily_cost * Decimal::from(DAYS_PER_MONTH),
        })
    }

    /// Event counters
    #[must_use]
    pub fn events(&self) -> CostEvents {
        CostEvents {
            budget_exceeded: self.budget_exceeded.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
        }
    }
}
