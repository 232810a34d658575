//! Alerts with cooldown-based suppression

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use ulid::Ulid;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational
    Low,
    /// Warning bound crossed
    Medium,
    /// Degradation needing attention soon
    High,
    /// Critical bound crossed or recovery exhausted
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        })
    }
}

/// A fired alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique, time-ordered id
    pub id: Ulid,
    /// Reporting component
    pub component: String,
    /// Offending metric
    pub metric: String,
    /// Observed value
    pub value: f64,
    /// Crossed bound
    pub threshold: f64,
    /// Severity
    pub severity: Severity,
    /// Remediation hints
    pub suggested_actions: Vec<String>,
    /// Firing time
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// New alert stamped now
    #[must_use]
    pub fn new(
        component: impl Into<String>,
        metric: impl Into<String>,
        value: f64,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        Self {
            id: Ulid::new(),
            component: component.into(),
            metric: metric.into(),
            value,
            threshold,
            severity,
            suggested_actions: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach remediation hints
    #[must_use]
    pub fn with_suggested_actions(mut self, actions: Vec<String>) -> Self {
        self.suggested_actions = actions;
        self
    }
}

/// Alert callback
pub type AlertHandler = Arc<dyn Fn(&Alert) + Send + Sync>;

type DedupKey = (String, String, Severity);

/// Fires, suppresses and remembers alerts
pub struct AlertManager {
    cooldown: Duration,
    max_recent: usize,
    last_fired: Mutex<HashMap<DedupKey, Instant>>,
    recent: Mutex<VecDeque<Alert>>,
    handlers: RwLock<Vec<AlertHandler>>,
    fired: AtomicU64,
    suppressed: AtomicU64,
}

impl fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertManager")
            .field("cooldown", &self.cooldown)
            .field("fired", &self.fired.load(Ordering::Relaxed))
            .field("suppressed", &self.suppressed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl AlertManager {
    /// Manager suppressing repeats within `cooldown`
    #[must_use]
    pub fn new(cooldown: Duration, max_recent: usize) -> Self {
        Self {
            cooldown,
            max_recent: max_recent.max(1),
            last_fired: Mutex::new(HashMap::new()),
            recent: Mutex::new(VecDeque::new()),
            handlers: RwLock::new(Vec::new()),
            fired: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Register a callback for every fired alert
    pub fn on_alert(&self, handler: AlertHandler) {
        self.handlers.write().push(handler);
    }

    /// Fire an alert unless the same condition fired within the cooldown
    ///
    /// Returns whether the alert fired.
    pub fn raise(&self, alert: Alert) -> bool {
        let key = (alert.component.clone(), alert.metric.clone(), alert.severity);
        let now = Instant::now();
        {
            let mut last_fired = self.last_fired.lock();
            if let Some(at) = last_fired.get(&key) {
                if now.duration_since(*at) < self.cooldown {
                    self.suppressed.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        component = %alert.component,
                        metric = %alert.metric,
                        severity = %alert.severity,
                        "alert suppressed"
                    );
                    return false;
                }
            }
            last_fired.insert(key, now);
        }

        match alert.severity {
            Severity::Critical | Severity::High => tracing::error!(
                id = %alert.id,
                component = %alert.component,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                severity = %alert.severity,
                "alert"
            ),
            Severity::Medium | Severity::Low => tracing::warn!(
                id = %alert.id,
                component = %alert.component,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                severity = %alert.severity,
                "alert"
            ),
        }

        for handler in self.handlers.read().iter() {
            handler(&alert);
        }

        self.fired.fetch_add(1, Ordering::Relaxed);
        let mut recent = self.recent.lock();
        if recent.len() == self.max_recent {
            recent.pop_front();
        }
        recent.push_back(alert);
        true
    }

    /// Alerts kept for reports, oldest first
    #[must_use]
    pub fn recent(&self) -> Vec<Alert> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Alerts fired
    #[must_use]
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Duplicates suppressed
    #[must_use]
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latency_alert(severity: Severity) -> Alert {
        Alert::new("engine", "latency_p95_ms", 1_500.0, 1_000.0, severity)
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_suppressed_within_cooldown() {
        let manager = AlertManager::new(Duration::from_secs(60), 10);
        assert!(manager.raise(latency_alert(Severity::Critical)));
        assert!(!manager.raise(latency_alert(Severity::Critical)));
        // Different severity is a different condition
        assert!(manager.raise(latency_alert(Severity::Medium)));
        assert_eq!(manager.suppressed(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(manager.raise(latency_alert(Severity::Critical)));
        assert_eq!(manager.fired(), 3);
    }

    #[test]
    fn handlers_see_fired_alerts_only() {
        let manager = AlertManager::new(Duration::from_secs(60), 10);
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        manager.on_alert(Arc::new(move |alert: &Alert| {
            assert_eq!(alert.component, "engine");
            counter.fetch_add(1, Ordering::Relaxed);
        }));
        manager.raise(latency_alert(Severity::Critical));
        manager.raise(latency_alert(Severity::Critical));
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn recent_alerts_are_bounded() {
        let manager = AlertManager::new(Duration::ZERO, 3);
        for i in 0..5 {
            manager.raise(Alert::new("c", format!("m{i}"), 1.0, 0.5, Severity::Low));
        }
        let metrics: Vec<_> = manager.recent().into_iter().map(|a| a.metric).collect();
        assert_eq!(metrics, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn alert_serializes_with_snake_case_severity() {
        let alert = latency_alert(Severity::Critical)
            .with_suggested_actions(vec!["failover_provider".into()]);
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["suggested_actions"][0], "failover_provider");
    }
}
