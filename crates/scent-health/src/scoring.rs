//! Metric, component and composite scoring
//!
//! ```text
//!  healthy side        warning          critical        unhealthy side
//!  ───────────────────────┼────────────────┼───────────────────────────
//!  score 1.0              1.0 ──linear──► 0.5   0.0
//! ```
//!
//! A component scores the mean of its thresholded metrics (1.0 when none
//! apply); the composite is the weighted mean of component scores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::{Direction, HealthConfig, MetricThreshold};

/// Health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Score at or above the healthy threshold
    Healthy,
    /// Score between the warning and healthy thresholds
    Warning,
    /// Score below the warning threshold, or forced by critical metrics
    Critical,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        })
    }
}

/// Where a metric sits relative to its bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricLevel {
    /// Inside the warning bound
    Normal,
    /// Past the warning bound
    Warning,
    /// Past the critical bound
    Critical,
}

/// One metric judged against its bound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvaluation {
    /// Metric name
    pub metric: String,
    /// Observed value
    pub value: f64,
    /// Score in `[0, 1]`
    pub score: f64,
    /// Level relative to the bounds
    pub level: MetricLevel,
    /// Bound that was crossed, or the warning bound when none was
    pub threshold: f64,
}

/// Scored state of one component at one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub component: String,
    /// Score in `[0, 1]`
    pub score: f64,
    /// Classification
    pub status: HealthStatus,
    /// Raw metrics as collected
    pub metrics: BTreeMap<String, f64>,
    /// Metrics that had a bound
    pub evaluations: Vec<MetricEvaluation>,
    /// Collection time
    pub timestamp: DateTime<Utc>,
}

impl ComponentHealth {
    /// Metrics past their critical bound
    pub fn critical_metrics(&self) -> impl Iterator<Item = &MetricEvaluation> {
        self.evaluations
            .iter()
            .filter(|e| e.level == MetricLevel::Critical)
    }
}

/// Score one value against its bound
#[must_use]
pub fn evaluate_metric(metric: &str, value: f64, threshold: &MetricThreshold) -> MetricEvaluation {
    // Flip lower-is-worse bounds so "larger is worse" holds below
    let (v, warning, critical) = match threshold.direction {
        Direction::HigherIsWorse => (value, threshold.warning, threshold.critical),
        Direction::LowerIsWorse => (-value, -threshold.warning, -threshold.critical),
    };

    let (score, level, crossed) = if !v.is_finite() || v > critical {
        (0.0, MetricLevel::Critical, threshold.critical)
    } else if v > warning {
        let span = critical - warning;
        let fraction = if span > 0.0 { (v - warning) / span } else { 1.0 };
        (1.0 - 0.5 * fraction, MetricLevel::Warning, threshold.warning)
    } else {
        (1.0, MetricLevel::Normal, threshold.warning)
    };

    MetricEvaluation {
        metric: metric.to_string(),
        value,
        score: score.clamp(0.0, 1.0),
        level,
        threshold: crossed,
    }
}

/// Classify a score
#[must_use]
pub fn classify(score: f64, config: &HealthConfig) -> HealthStatus {
    if score >= config.healthy_threshold {
        HealthStatus::Healthy
    } else if score >= config.warning_threshold {
        HealthStatus::Warning
    } else {
        HealthStatus::Critical
    }
}

/// Score a component's metrics
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn score_component(
    component: &str,
    metrics: BTreeMap<String, f64>,
    config: &HealthConfig,
    timestamp: DateTime<Utc>,
) -> ComponentHealth {
    let evaluations: Vec<MetricEvaluation> = metrics
        .iter()
        .filter_map(|(metric, value)| {
            config
                .threshold(component, metric)
                .map(|t| evaluate_metric(metric, *value, t))
        })
        .collect();

    let score = if evaluations.is_empty() {
        1.0
    } else {
        evaluations.iter().map(|e| e.score).sum::<f64>() / evaluations.len() as f64
    };

    let critical_count = evaluations
        .iter()
        .filter(|e| e.level == MetricLevel::Critical)
        .count();
    let status = if critical_count >= 2 {
        HealthStatus::Critical
    } else {
        classify(score, config)
    };

    ComponentHealth {
        component: component.to_string(),
        score,
        status,
        metrics,
        evaluations,
        timestamp,
    }
}

/// Weighted composite score and overall status
///
/// Any critical component forces the overall status to critical.
#[must_use]
pub fn composite(components: &[ComponentHealth], config: &HealthConfig) -> (f64, HealthStatus) {
    let (weighted, total_weight) = components.iter().fold((0.0, 0.0), |(sum, total), c| {
        let w = config.weight(&c.component);
        (sum + w * c.score, total + w)
    });
    let score = if total_weight > 0.0 {
        (weighted / total_weight).clamp(0.0, 1.0)
    } else {
        1.0
    };

    let status = if components.iter().any(|c| c.status == HealthStatus::Critical) {
        HealthStatus::Critical
    } else {
        classify(score, config)
    };
    (score, status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn higher_is_worse_scoring() {
        let t = MetricThreshold::higher_is_worse("latency_p95_ms", 200.0, 1_000.0);
        assert!((evaluate_metric("l", 100.0, &t).score - 1.0).abs() < 1e-9);
        let mid = evaluate_metric("l", 600.0, &t);
        assert!((mid.score - 0.75).abs() < 1e-9);
        assert_eq!(mid.level, MetricLevel::Warning);
        let past = evaluate_metric("l", 1_500.0, &t);
        assert!(past.score.abs() < f64::EPSILON);
        assert_eq!(past.level, MetricLevel::Critical);
        assert!((past.threshold - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn lower_is_worse_scoring() {
        let t = MetricThreshold::lower_is_worse("hit_rate", 0.7, 0.4);
        assert_eq!(evaluate_metric("h", 0.9, &t).level, MetricLevel::Normal);
        let mid = evaluate_metric("h", 0.55, &t);
        assert!((mid.score - 0.75).abs() < 1e-9);
        assert_eq!(evaluate_metric("h", 0.1, &t).level, MetricLevel::Critical);
    }

    #[test]
    fn non_finite_value_is_critical() {
        let t = MetricThreshold::higher_is_worse("error_rate", 0.05, 0.15);
        assert_eq!(evaluate_metric("e", f64::NAN, &t).level, MetricLevel::Critical);
    }

    #[test]
    fn component_without_thresholds_is_healthy() {
        let config = HealthConfig::default();
        let health = score_component("x", metrics(&[("unbounded", 1e9)]), &config, Utc::now());
        assert!((health.score - 1.0).abs() < f64::EPSILON);
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[test]
    fn two_critical_metrics_force_critical() {
        let config = HealthConfig::default();
        let health = score_component(
            "engine",
            metrics(&[
                ("error_rate", 0.5),
                ("latency_p95_ms", 5_000.0),
                ("hit_rate", 0.95),
                ("queue_depth", 0.0),
                ("budget_utilization", 0.1),
            ]),
            &config,
            Utc::now(),
        );
        // Mean score 0.6 would only be a warning
        assert!((health.score - 0.6).abs() < 1e-9);
        assert_eq!(health.status, HealthStatus::Critical);
        assert_eq!(health.critical_metrics().count(), 2);
    }

    #[test]
    fn critical_component_forces_overall_critical() {
        let config = HealthConfig::default().with_component_weight("engine", 0.1);
        let now = Utc::now();
        let healthy = score_component("cache", metrics(&[("hit_rate", 0.9)]), &config, now);
        let critical = score_component(
            "engine",
            metrics(&[("error_rate", 0.9), ("latency_p95_ms", 9_000.0)]),
            &config,
            now,
        );
        let (score, status) = composite(&[healthy, critical], &config);
        assert!((0.0..=1.0).contains(&score));
        assert!(score > 0.8);
        assert_eq!(status, HealthStatus::Critical);
    }

    #[test]
    fn empty_composite_is_healthy() {
        let (score, status) = composite(&[], &HealthConfig::default());
        assert!((score - 1.0).abs() < f64::EPSILON);
        assert_eq!(status, HealthStatus::Healthy);
    }
}
