//! Monitor configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::HealthError;
use crate::recovery::IssueType;

/// Which side of a threshold is unhealthy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Larger values are worse, e.g. latency
    HigherIsWorse,
    /// Smaller values are worse, e.g. hit rate
    LowerIsWorse,
}

/// Warning and critical bounds for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricThreshold {
    /// Component the bound applies to; `None` matches every component
    #[serde(default)]
    pub component: Option<String>,
    /// Metric name
    pub metric: String,
    /// Warning bound
    pub warning: f64,
    /// Critical bound
    pub critical: f64,
    /// Unhealthy side
    pub direction: Direction,
}

impl MetricThreshold {
    /// Bound where larger values are worse
    #[must_use]
    pub fn higher_is_worse(metric: impl Into<String>, warning: f64, critical: f64) -> Self {
        Self {
            component: None,
            metric: metric.into(),
            warning,
            critical,
            direction: Direction::HigherIsWorse,
        }
    }

    /// Bound where smaller values are worse
    #[must_use]
    pub fn lower_is_worse(metric: impl Into<String>, warning: f64, critical: f64) -> Self {
        Self {
            component: None,
            metric: metric.into(),
            warning,
            critical,
            direction: Direction::LowerIsWorse,
        }
    }

    /// Restrict to one component
    #[must_use]
    pub fn for_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Applies to `metric` reported by `component`
    #[must_use]
    pub fn matches(&self, component: &str, metric: &str) -> bool {
        self.metric == metric && self.component.as_deref().map_or(true, |c| c == component)
    }
}

/// Maps a critical metric to the issue it indicates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRule {
    /// Component filter; `None` matches every component
    #[serde(default)]
    pub component: Option<String>,
    /// Metric name
    pub metric: String,
    /// Indicated issue
    pub issue: IssueType,
}

impl IssueRule {
    /// Rule for any component
    #[must_use]
    pub fn new(metric: impl Into<String>, issue: IssueType) -> Self {
        Self {
            component: None,
            metric: metric.into(),
            issue,
        }
    }

    /// Applies to `metric` reported by `component`
    #[must_use]
    pub fn matches(&self, component: &str, metric: &str) -> bool {
        self.metric == metric && self.component.as_deref().map_or(true, |c| c == component)
    }
}

/// Bounds on automated recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Attempts before escalating
    pub max_attempts: u32,
    /// Pause after the first failed attempt
    pub initial_backoff_ms: u64,
    /// Multiplier applied to the pause after each failure
    pub backoff_factor: f64,
    /// Longest pause
    pub max_backoff_ms: u64,
    /// Timeout per action
    pub action_timeout_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            backoff_factor: 2.0,
            max_backoff_ms: 30_000,
            action_timeout_ms: 10_000,
        }
    }
}

impl RecoveryConfig {
    /// Pause before attempt `attempt + 1`, counting from zero
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt as i32);
        let ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Action timeout as a duration
    #[inline]
    #[must_use]
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}

/// Everything the monitor needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Time between ticks
    pub interval_ms: u64,
    /// Metric bounds
    pub thresholds: Vec<MetricThreshold>,
    /// Composite weight per component; unlisted components weigh 1.0
    pub component_weights: BTreeMap<String, f64>,
    /// Lowest score still healthy
    pub healthy_threshold: f64,
    /// Lowest score still warning
    pub warning_threshold: f64,
    /// Window in which a repeated alert is suppressed
    pub alert_cooldown_ms: u64,
    /// Alerts kept for reports
    pub max_recent_alerts: usize,
    /// Recovery bounds
    pub recovery: RecoveryConfig,
    /// Critical metric to issue mapping
    pub issue_rules: Vec<IssueRule>,
    /// Evaluations kept for trend analysis
    pub history_len: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            thresholds: default_thresholds(),
            component_weights: BTreeMap::new(),
            healthy_threshold: 0.8,
            warning_threshold: 0.5,
            alert_cooldown_ms: 300_000,
            max_recent_alerts: 100,
            recovery: RecoveryConfig::default(),
            issue_rules: default_issue_rules(),
            history_len: 60,
        }
    }
}

fn default_thresholds() -> Vec<MetricThreshold> {
    vec![
        MetricThreshold::higher_is_worse("error_rate", 0.05, 0.15),
        MetricThreshold::higher_is_worse("latency_p95_ms", 200.0, 1_000.0),
        MetricThreshold::lower_is_worse("hit_rate", 0.7, 0.4),
        MetricThreshold::higher_is_worse("queue_depth", 50.0, 200.0),
        MetricThreshold::higher_is_worse("budget_utilization", 0.8, 1.0),
        MetricThreshold::higher_is_worse("provider_failure_rate", 0.2, 0.5),
        MetricThreshold::higher_is_worse("store_error_rate", 0.05, 0.2),
        MetricThreshold::higher_is_worse("tier_error_rate", 0.05, 0.25),
    ]
}

fn default_issue_rules() -> Vec<IssueRule> {
    vec![
        IssueRule::new("provider_failure_rate", IssueType::ProviderConnectivity),
        IssueRule::new("store_error_rate", IssueType::IndexDegradation),
        IssueRule::new("queue_depth", IssueType::ConnectionExhaustion),
        IssueRule::new("hit_rate", IssueType::CacheDegradation),
        IssueRule::new("tier_error_rate", IssueType::CacheDegradation),
        IssueRule::new("budget_utilization", IssueType::BudgetExhaustion),
    ]
}

impl HealthConfig {
    /// Set the tick interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Add a metric bound
    #[must_use]
    pub fn with_threshold(mut self, threshold: MetricThreshold) -> Self {
        self.thresholds.push(threshold);
        self
    }

    /// Replace all metric bounds
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Vec<MetricThreshold>) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Set a component's composite weight
    #[must_use]
    pub fn with_component_weight(mut self, component: impl Into<String>, weight: f64) -> Self {
        self.component_weights.insert(component.into(), weight);
        self
    }

    /// Set the alert cooldown
    #[must_use]
    pub fn with_alert_cooldown(mut self, cooldown: Duration) -> Self {
        self.alert_cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Replace the recovery bounds
    #[must_use]
    pub fn with_recovery(mut self, recovery: RecoveryConfig) -> Self {
        self.recovery = recovery;
        self
    }

    /// Add an issue rule
    #[must_use]
    pub fn with_issue_rule(mut self, rule: IssueRule) -> Self {
        self.issue_rules.push(rule);
        self
    }

    /// Tick interval as a duration
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Alert cooldown as a duration
    #[inline]
    #[must_use]
    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_millis(self.alert_cooldown_ms)
    }

    /// Composite weight of a component
    #[must_use]
    pub fn weight(&self, component: &str) -> f64 {
        self.component_weights.get(component).copied().unwrap_or(1.0)
    }

    /// First bound matching a metric
    #[must_use]
    pub fn threshold(&self, component: &str, metric: &str) -> Option<&MetricThreshold> {
        self.thresholds.iter().find(|t| t.matches(component, metric))
    }

    /// Issue indicated by a critical metric
    #[must_use]
    pub fn issue_for(&self, component: &str, metric: &str) -> Option<IssueType> {
        self.issue_rules
            .iter()
            .find(|r| r.matches(component, metric))
            .map(|r| r.issue)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), HealthError> {
        if self.interval_ms == 0 {
            return Err(HealthError::InvalidConfig("interval_ms must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.warning_threshold)
            || !(0.0..=1.0).contains(&self.healthy_threshold)
            || self.warning_threshold > self.healthy_threshold
        {
            return Err(HealthError::InvalidConfig(
                "require 0 <= warning_threshold <= healthy_threshold <= 1".into(),
            ));
        }
        for t in &self.thresholds {
            let ordered = match t.direction {
                Direction::HigherIsWorse => t.warning <= t.critical,
                Direction::LowerIsWorse => t.warning >= t.critical,
            };
            if !ordered {
                return Err(HealthError::InvalidConfig(format!(
                    "{}: warning bound must come before critical bound",
                    t.metric
                )));
            }
        }
        if let Some((component, _)) = self.component_weights.iter().find(|(_, w)| **w < 0.0) {
            return Err(HealthError::InvalidConfig(format!(
                "weight of {component} must not be negative"
            )));
        }
        if self.recovery.backoff_factor < 1.0 {
            return Err(HealthError::InvalidConfig(
                "backoff_factor must be at least 1.0".into(),
            ));
        }
        if self.history_len == 0 {
            return Err(HealthError::InvalidConfig("history_len must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        HealthConfig::default().validate().unwrap();
    }

    #[test]
    fn backoff_grows_and_caps() {
        let recovery = RecoveryConfig {
            initial_backoff_ms: 100,
            backoff_factor: 2.0,
            max_backoff_ms: 500,
            ..RecoveryConfig::default()
        };
        assert_eq!(recovery.backoff(0), Duration::from_millis(100));
        assert_eq!(recovery.backoff(1), Duration::from_millis(200));
        assert_eq!(recovery.backoff(2), Duration::from_millis(400));
        assert_eq!(recovery.backoff(3), Duration::from_millis(500));
    }

    #[test]
    fn component_specific_threshold_wins_when_listed_first() {
        let config = HealthConfig::default().with_thresholds(vec![
            MetricThreshold::higher_is_worse("latency_p95_ms", 50.0, 100.0).for_component("cache"),
            MetricThreshold::higher_is_worse("latency_p95_ms", 200.0, 1_000.0),
        ]);
        assert!((config.threshold("cache", "latency_p95_ms").unwrap().warning - 50.0).abs() < 1e-9);
        assert!((config.threshold("engine", "latency_p95_ms").unwrap().warning - 200.0).abs() < 1e-9);
        assert!(config.threshold("engine", "unknown").is_none());
    }

    #[test]
    fn inverted_bounds_rejected() {
        let config = HealthConfig::default()
            .with_threshold(MetricThreshold::lower_is_worse("hit_rate", 0.3, 0.6));
        assert!(config.validate().is_err());
    }

    #[test]
    fn issue_rules_map_metrics() {
        let config = HealthConfig::default();
        assert_eq!(
            config.issue_for("cost", "provider_failure_rate"),
            Some(IssueType::ProviderConnectivity)
        );
        assert_eq!(config.issue_for("cost", "latency_p95_ms"), None);
    }
}
