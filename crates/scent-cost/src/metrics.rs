//! AI operation metrics, token usage and monthly projections

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Latency samples kept per operation for percentile estimates
pub const LATENCY_SAMPLE_CAP: usize = 1_000;

/// Aggregated metrics of one AI operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMetrics {
    /// Operation name
    pub operation: String,
    /// Calls recorded
    pub count: u64,
    /// Failed calls
    pub errors: u64,
    /// `errors / count`
    pub error_rate: f64,
    /// Mean latency over all calls
    pub avg_latency_ms: f64,
    /// Nearest-rank 95th percentile over recent calls
    pub p95_latency_ms: f64,
}

/// Token consumption over a period
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens across providers
    pub total: u64,
    /// Tokens per provider
    pub by_provider: BTreeMap<String, u64>,
    /// Spend over the same period
    pub cost_usd: Decimal,
}

/// Inputs to a monthly cost projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyEstimateParams {
    /// Generation requests per day
    pub daily_requests: u64,
    /// Mean tokens per request
    pub avg_tokens_per_request: u64,
    /// Provider whose rate applies
    pub provider: String,
    /// Share of requests served from cache without generation
    #[serde(default)]
    pub cache_hit_rate: f64,
}

/// Result of a monthly cost projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyEstimate {
    /// Provider whose rate applied
    pub provider: String,
    /// Requests reaching the provider per month
    pub billable_requests: u64,
    /// Tokens per month
    pub tokens: u64,
    /// Projected spend per day
    pub daily_cost_usd: Decimal,
    /// Projected spend per 30-day month
    pub monthly_cost_usd: Decimal,
}

#[derive(Debug, Default)]
struct OperationState {
    count: u64,
    errors: u64,
    total_latency_ms: f64,
    recent: VecDeque<f64>,
}

impl OperationState {
    #[allow(clippy::cast_precision_loss)]
    fn snapshot(&self, operation: &str) -> OperationMetrics {
        let count = self.count.max(1) as f64;
        OperationMetrics {
            operation: operation.to_string(),
            count: self.count,
            errors: self.errors,
            error_rate: self.errors as f64 / count,
            avg_latency_ms: self.total_latency_ms / count,
            p95_latency_ms: percentile(&self.recent, 0.95),
        }
    }
}

/// Nearest-rank percentile, 0 when there are no samples
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn percentile(samples: &VecDeque<f64>, q: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Per-operation latency and error recorder
#[derive(Debug, Default)]
pub struct AiMetrics {
    operations: Mutex<BTreeMap<String, OperationState>>,
}

impl AiMetrics {
    /// Empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call
    pub fn record(&self, operation: &str, latency_ms: f64, success: bool) {
        let mut operations = self.operations.lock();
        let state = operations.entry(operation.to_string()).or_default();
        state.count += 1;
        if !success {
            state.errors += 1;
        }
        state.total_latency_ms += latency_ms;
        if state.recent.len() == LATENCY_SAMPLE_CAP {
            state.recent.pop_front();
        }
        state.recent.push_back(latency_ms);
    }

    /// Metrics of every operation, sorted by name
    #[must_use]
    pub fn snapshot(&self) -> Vec<OperationMetrics> {
        self.operations
            .lock()
            .iter()
            .map(|(name, state)| state.snapshot(name))
            .collect()
    }

    /// Metrics of one operation
    #[must_use]
    pub fn operation(&self, operation: &str) -> Option<OperationMetrics> {
        self.operations
            .lock()
            .get(operation)
            .map(|state| state.snapshot(operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p95_uses_nearest_rank() {
        let metrics = AiMetrics::new();
        for latency in 1..=100 {
            metrics.record("explain", f64::from(latency), latency % 10 != 0);
        }
        let explain = metrics.operation("explain").unwrap();
        assert_eq!(explain.count, 100);
        assert_eq!(explain.errors, 10);
        assert!((explain.error_rate - 0.1).abs() < 1e-9);
        assert!((explain.avg_latency_ms - 50.5).abs() < 1e-9);
        assert!((explain.p95_latency_ms - 95.0).abs() < 1e-9);
    }

    #[test]
    fn latency_buffer_is_capped() {
        let metrics = AiMetrics::new();
        for _ in 0..LATENCY_SAMPLE_CAP {
            metrics.record("explain", 1_000.0, true);
        }
        for _ in 0..LATENCY_SAMPLE_CAP {
            metrics.record("explain", 10.0, true);
        }
        let explain = metrics.operation("explain").unwrap();
        assert_eq!(explain.count, 2_000);
        assert!((explain.p95_latency_ms - 10.0).abs() < 1e-9);
        assert!((explain.avg_latency_ms - 505.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_sorted_by_operation() {
        let metrics = AiMetrics::new();
        metrics.record("summarize", 5.0, true);
        metrics.record("explain", 5.0, false);
        let names: Vec<_> = metrics.snapshot().into_iter().map(|m| m.operation).collect();
        assert_eq!(names, vec!["explain", "summarize"]);
        assert!(metrics.operation("missing").is_none());
    }
}
