//! Spend spike detection
//!
//! Compares spend in the latest sample window with the mean spend per sample
//! window over a trailing baseline that excludes the sample itself.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::CostLedger;

/// Detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Length of the recent sample in seconds
    pub sample_window_secs: i64,
    /// Length of the trailing baseline in seconds
    pub baseline_window_secs: i64,
    /// Ratio above which the sample is a spike
    pub spike_multiplier: f64,
    /// Baseline floor in USD per sample, so an idle baseline still yields a ratio
    pub min_baseline_usd: Decimal,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            sample_window_secs: 3_600,
            baseline_window_secs: 86_400,
            spike_multiplier: 2.0,
            min_baseline_usd: Decimal::new(1, 2),
        }
    }
}

impl AnomalyConfig {
    fn sample(&self) -> Duration {
        Duration::seconds(self.sample_window_secs)
    }

    fn baseline(&self) -> Duration {
        Duration::seconds(self.baseline_window_secs)
    }

    fn buckets(&self) -> i64 {
        if self.sample_window_secs <= 0 {
            return 1;
        }
        (self.baseline_window_secs / self.sample_window_secs).max(1)
    }
}

/// Verdict of one detection pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostAnomaly {
    /// Ratio exceeded the multiplier
    pub is_spike: bool,
    /// `recent / baseline`
    pub magnitude: f64,
    /// Certainty of the verdict in `[0, 1]`
    pub confidence: f64,
    /// Spend in the sample window
    pub recent: Decimal,
    /// Mean spend per sample window over the baseline
    pub baseline: Decimal,
}

/// Run detection over the ledger at `now`
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn detect(ledger: &CostLedger, config: &AnomalyConfig, now: DateTime<Utc>) -> CostAnomaly {
    let sample_start = now - config.sample();
    let baseline_start = sample_start - config.baseline();

    let recent = ledger.spend_between(sample_start, now);
    let baseline_total = ledger.spend_between(baseline_start, sample_start);
    let buckets = config.buckets();
    let baseline = baseline_total / Decimal::from(buckets);

    let denominator = baseline.max(config.min_baseline_usd);
    let magnitude = if denominator.is_zero() {
        0.0
    } else {
        (recent / denominator).to_f64().unwrap_or(0.0)
    };
    let is_spike = magnitude > config.spike_multiplier;

    let active = ledger.active_buckets(baseline_start, sample_start, config.sample());
    let coverage = (active as f64 / buckets as f64).clamp(0.0, 1.0);
    let confidence = if is_spike {
        let excess = ((magnitude - config.spike_multiplier) / config.spike_multiplier).min(1.0);
        coverage * (0.5 + 0.5 * excess)
    } else {
        coverage
    }
    .clamp(0.0, 1.0);

    if is_spike {
        tracing::warn!(
            recent = %recent,
            baseline = %baseline,
            magnitude,
            confidence,
            "cost spike detected"
        );
    }

    CostAnomaly {
        is_spike,
        magnitude,
        confidence,
        recent,
        baseline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::CostRecord;
    use rust_decimal_macros::dec;

    fn spend(ledger: &CostLedger, cost: Decimal, at: DateTime<Utc>) {
        ledger.append(CostRecord {
            provider: "standard".into(),
            tokens: 100,
            cost_usd: cost,
            timestamp: at,
        });
    }

    fn steady_baseline(ledger: &CostLedger, now: DateTime<Utc>) {
        // $1 in each of the 24 hours before the sample window
        for h in 1..=24 {
            spend(ledger, dec!(1), now - Duration::hours(h) - Duration::minutes(30));
        }
    }

    #[test]
    fn flat_spend_is_not_a_spike() {
        let ledger = CostLedger::default();
        let now = Utc::now();
        steady_baseline(&ledger, now);
        spend(&ledger, dec!(1), now - Duration::minutes(10));

        let anomaly = detect(&ledger, &AnomalyConfig::default(), now);
        assert!(!anomaly.is_spike);
        assert_eq!(anomaly.baseline, dec!(1));
        assert!((anomaly.magnitude - 1.0).abs() < 1e-9);
        assert!(anomaly.confidence > 0.9);
    }

    #[test]
    fn tripled_spend_is_a_spike() {
        let ledger = CostLedger::default();
        let now = Utc::now();
        steady_baseline(&ledger, now);
        spend(&ledger, dec!(3), now - Duration::minutes(10));

        let anomaly = detect(&ledger, &AnomalyConfig::default(), now);
        assert!(anomaly.is_spike);
        assert!((anomaly.magnitude - 3.0).abs() < 1e-9);
        assert!(anomaly.confidence > 0.5 && anomaly.confidence <= 1.0);
    }

    #[test]
    fn confidence_tracks_baseline_coverage() {
        let ledger = CostLedger::default();
        let now = Utc::now();
        spend(&ledger, dec!(2), now - Duration::hours(3));
        spend(&ledger, dec!(5), now - Duration::minutes(5));

        let anomaly = detect(&ledger, &AnomalyConfig::default(), now);
        assert!(anomaly.is_spike);
        assert!(anomaly.confidence < 0.1);
    }

    #[test]
    fn empty_ledger_is_quiet() {
        let anomaly = detect(&CostLedger::default(), &AnomalyConfig::default(), Utc::now());
        assert!(!anomaly.is_spike);
        assert!(anomaly.magnitude.abs() < f64::EPSILON);
        assert!(anomaly.confidence.abs() < f64::EPSILON);
    }
}
