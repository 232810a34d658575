//! The health monitor
//!
//! One [`HealthMonitor::tick`] does, in order:
//!
//! 1. collect metrics from every [`HealthSource`]
//! 2. score components and the weighted composite
//! 3. raise alerts for metrics past their bounds
//! 4. when overall status is critical, recover each issue indicated by a
//!    critical metric, escalating when recovery is exhausted
//! 5. append the evaluation to the trend history and export telemetry

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::alert::{Alert, AlertHandler, AlertManager, Severity};
use crate::config::HealthConfig;
use crate::error::HealthError;
use crate::recovery::{
    IssueType, RecoveryAttempt, RecoveryCoordinator, RecoveryExecutor, RecoveryOutcome,
};
use crate::scoring::{self, ComponentHealth, HealthStatus, MetricLevel};
use crate::source::HealthSource;
use crate::telemetry::{TelemetrySink, TelemetrySnapshot};

/// Score change between history halves treated as a real trend
const TREND_EPSILON: f64 = 0.05;

/// Direction of the composite score over recent ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    /// Recent scores higher than earlier ones
    Improving,
    /// No meaningful change
    Stable,
    /// Recent scores lower than earlier ones
    Degrading,
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEvaluation {
    /// Composite score in `[0, 1]`
    pub overall_score: f64,
    /// Overall status
    pub status: HealthStatus,
    /// Per-component results
    pub components: Vec<ComponentHealth>,
    /// Alerts fired during the tick
    pub alerts_fired: usize,
    /// Recoveries run during the tick
    pub recoveries: Vec<RecoveryOutcome>,
    /// Tick time
    pub timestamp: DateTime<Utc>,
}

/// Summary for operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Composite score of the latest tick, 1.0 before the first
    pub overall_score: f64,
    /// Status of the latest tick
    pub status: HealthStatus,
    /// Components of the latest tick
    pub components: Vec<ComponentHealth>,
    /// Recently fired alerts, oldest first
    pub recent_alerts: Vec<Alert>,
    /// Duplicates suppressed by the cooldown
    pub suppressed_alerts: u64,
    /// Recorded recovery attempts, oldest first
    pub recoveries: Vec<RecoveryAttempt>,
    /// Recoveries escalated to operators
    pub escalations: u64,
    /// Composite score trend
    pub trend: Trend,
    /// Report time
    pub generated_at: DateTime<Utc>,
}

/// Builder for [`HealthMonitor`]
pub struct HealthMonitorBuilder {
    config: HealthConfig,
    sources: Vec<Arc<dyn HealthSource>>,
    executor: Option<Arc<dyn RecoveryExecutor>>,
    sink: Option<Arc<dyn TelemetrySink>>,
}

impl HealthMonitorBuilder {
    /// Add a metric source
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn HealthSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Enable automated recovery through `executor`
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn RecoveryExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Export snapshots to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<HealthMonitor, HealthError> {
        self.config.validate()?;
        let mut names = BTreeSet::new();
        for source in &self.sources {
            if !names.insert(source.component().to_string()) {
                return Err(HealthError::DuplicateSource(source.component().to_string()));
            }
        }
        let recovery = self
            .executor
            .map(|executor| RecoveryCoordinator::new(self.config.recovery.clone(), executor));
        Ok(HealthMonitor {
            alerts: AlertManager::new(self.config.alert_cooldown(), self.config.max_recent_alerts),
            history: Mutex::new(VecDeque::with_capacity(self.config.history_len)),
            config: self.config,
            sources: self.sources,
            recovery,
            sink: self.sink,
            escalations: AtomicU64::new(0),
        })
    }
}

/// Periodic health evaluation with alerting and recovery
pub struct HealthMonitor {
    config: HealthConfig,
    sources: Vec<Arc<dyn HealthSource>>,
    alerts: AlertManager,
    recovery: Option<RecoveryCoordinator>,
    sink: Option<Arc<dyn TelemetrySink>>,
    history: Mutex<VecDeque<HealthEvaluation>>,
    escalations: AtomicU64,
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field(
                "sources",
                &self.sources.iter().map(|s| s.component()).collect::<Vec<_>>(),
            )
            .field("recovery", &self.recovery.is_some())
            .field("sink", &self.sink.as_ref().map(|s| s.name()))
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Start building a monitor
    #[must_use]
    pub fn builder(config: HealthConfig) -> HealthMonitorBuilder {
        HealthMonitorBuilder {
            config,
            sources: Vec::new(),
            executor: None,
            sink: None,
        }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Register an alert callback
    pub fn on_alert(&self, handler: AlertHandler) {
        self.alerts.on_alert(handler);
    }

    /// Run one evaluation
    pub async fn tick(&self) -> HealthEvaluation {
        let timestamp = Utc::now();
        let components: Vec<ComponentHealth> = self
            .sources
            .iter()
            .map(|source| {
                scoring::score_component(source.component(), source.collect(), &self.config, timestamp)
            })
            .collect();
        let (overall_score, status) = scoring::composite(&components, &self.config);

        let alerts_fired = self.raise_alerts(&components);

        let mut recoveries = Vec::new();
        if status == HealthStatus::Critical {
            for (component, metric, issue) in self.detected_issues(&components) {
                if let Some(outcome) = self.recover(&component, &metric, issue).await {
                    recoveries.push(outcome);
                }
            }
        }

        tracing::debug!(score = overall_score, status = %status, alerts_fired, "health tick");

        let evaluation = HealthEvaluation {
            overall_score,
            status,
            components,
            alerts_fired,
            recoveries,
            timestamp,
        };

        if let Some(sink) = &self.sink {
            sink.export(&TelemetrySnapshot::from_components(
                &evaluation.components,
                overall_score,
                status,
                timestamp,
            ));
        }

        let mut history = self.history.lock();
        if history.len() == self.config.history_len {
            history.pop_front();
        }
        history.push_back(evaluation.clone());
        evaluation
    }

    fn raise_alerts(&self, components: &[ComponentHealth]) -> usize {
        let mut fired = 0;
        for component in components {
            for evaluation in &component.evaluations {
                let severity = match evaluation.level {
                    MetricLevel::Normal => continue,
                    MetricLevel::Warning => Severity::Medium,
                    MetricLevel::Critical => Severity::Critical,
                };
                let alert = Alert::new(
                    &component.component,
                    &evaluation.metric,
                    evaluation.value,
                    evaluation.threshold,
                    severity,
                )
                .with_suggested_actions(self.suggestions(&component.component, &evaluation.metric));
                if self.alerts.raise(alert) {
                    fired += 1;
                }
            }
        }
        fired
    }

    fn suggestions(&self, component: &str, metric: &str) -> Vec<String> {
        match self.config.issue_for(component, metric) {
            Some(issue) => issue
                .candidate_actions()
                .iter()
                .map(ToString::to_string)
                .collect(),
            None => vec![format!("investigate {metric} on {component}")],
        }
    }

    /// Issues behind critical metrics, first occurrence of each
    fn detected_issues(&self, components: &[ComponentHealth]) -> Vec<(String, String, IssueType)> {
        let mut seen = BTreeSet::new();
        let mut issues = Vec::new();
        for component in components {
            for evaluation in component.critical_metrics() {
                if let Some(issue) = self.config.issue_for(&component.component, &evaluation.metric) {
                    if seen.insert(issue) {
                        issues.push((component.component.clone(), evaluation.metric.clone(), issue));
                    }
                }
            }
        }
        issues
    }

    async fn recover(&self, component: &str, metric: &str, issue: IssueType) -> Option<RecoveryOutcome> {
        let Some(coordinator) = &self.recovery else {
            tracing::warn!(issue = %issue, "no recovery executor configured");
            return None;
        };
        let outcome = coordinator.recover(issue).await;
        if let RecoveryOutcome::Escalated { attempts, .. } = &outcome {
            self.escalations.fetch_add(1, Ordering::Relaxed);
            let alert = Alert::new(
                component,
                format!("recovery:{issue}"),
                f64::from(*attempts),
                f64::from(self.config.recovery.max_attempts),
                Severity::Critical,
            )
            .with_suggested_actions(vec![format!(
                "manual intervention required: {issue} persists after {attempts} attempts ({metric})"
            )]);
            self.alerts.raise(alert);
        }
        Some(outcome)
    }

    /// Latest evaluation, if any tick has run
    #[must_use]
    pub fn latest(&self) -> Option<HealthEvaluation> {
        self.history.lock().back().cloned()
    }

    /// Composite score trend over the kept history
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn trend(&self) -> Trend {
        let scores: Vec<f64> = self.history.lock().iter().map(|e| e.overall_score).collect();
        if scores.len() < 2 {
            return Trend::Stable;
        }
        let (older, newer) = scores.split_at(scores.len() / 2);
        let mean = |s: &[f64]| s.iter().sum::<f64>() / s.len() as f64;
        let (older, newer) = (mean(older), mean(newer));
        if newer - older > TREND_EPSILON {
            Trend::Improving
        } else if older - newer > TREND_EPSILON {
            Trend::Degrading
        } else {
            Trend::Stable
        }
    }

    /// Operator summary
    #[must_use]
    pub fn health_report(&self) -> HealthReport {
        let latest = self.latest();
        HealthReport {
            overall_score: latest.as_ref().map_or(1.0, |e| e.overall_score),
            status: latest.as_ref().map_or(HealthStatus::Healthy, |e| e.status),
            components: latest.map(|e| e.components).unwrap_or_default(),
            recent_alerts: self.alerts.recent(),
            suppressed_alerts: self.alerts.suppressed(),
            recoveries: self
                .recovery
                .as_ref()
                .map(RecoveryCoordinator::history)
                .unwrap_or_default(),
            escalations: self.escalations.load(Ordering::Relaxed),
            trend: self.trend(),
            generated_at: Utc::now(),
        }
    }

    /// Run [`Self::tick`] every configured interval until shut down
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_ms = self.config.interval_ms, "health monitor started");
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = self.tick() => {}
                }
            }
            if let Some(sink) = &self.sink {
                sink.flush();
            }
            tracing::info!("health monitor stopped");
        });
        MonitorHandle { cancel, join }
    }
}

/// Handle to a spawned monitor loop
#[derive(Debug)]
pub struct MonitorHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the loop and wait for it to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.join.await {
            tracing::warn!(error = %err, "health monitor task failed");
        }
    }

    /// Loop has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecoveryError;
    use crate::recovery::RecoveryAction;
    use async_trait::async_trait;
    use parking_lot::RwLock;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct Gauge {
        name: &'static str,
        values: RwLock<BTreeMap<String, f64>>,
    }

    impl Gauge {
        fn new(name: &'static str, pairs: &[(&str, f64)]) -> Arc<Self> {
            let gauge = Arc::new(Self {
                name,
                values: RwLock::new(BTreeMap::new()),
            });
            gauge.set(pairs);
            gauge
        }

        fn set(&self, pairs: &[(&str, f64)]) {
            *self.values.write() = pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect();
        }
    }

    impl HealthSource for Gauge {
        fn component(&self) -> &str {
            self.name
        }

        fn collect(&self) -> BTreeMap<String, f64> {
            self.values.read().clone()
        }
    }

    struct Failing;

    #[async_trait]
    impl RecoveryExecutor for Failing {
        async fn execute(&self, action: RecoveryAction, _issue: IssueType) -> Result<(), RecoveryError> {
            Err(RecoveryError::Failed {
                action,
                reason: "down".into(),
            })
        }
    }

    struct Counting(Mutex<Vec<TelemetrySnapshot>>);

    impl TelemetrySink for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn export(&self, snapshot: &TelemetrySnapshot) {
            self.0.lock().push(snapshot.clone());
        }
    }

    fn fast_recovery() -> HealthConfig {
        HealthConfig::default().with_recovery(crate::config::RecoveryConfig {
            max_attempts: 2,
            initial_backoff_ms: 10,
            backoff_factor: 2.0,
            max_backoff_ms: 100,
            action_timeout_ms: 100,
        })
    }

    #[tokio::test]
    async fn healthy_components_raise_nothing() {
        let monitor = HealthMonitor::builder(HealthConfig::default())
            .with_source(Gauge::new("cache", &[("hit_rate", 0.92), ("latency_p95_ms", 3.0)]))
            .build()
            .unwrap();
        let evaluation = monitor.tick().await;
        assert_eq!(evaluation.status, HealthStatus::Healthy);
        assert!((evaluation.overall_score - 1.0).abs() < f64::EPSILON);
        assert_eq!(evaluation.alerts_fired, 0);
    }

    #[tokio::test]
    async fn error_and_latency_past_critical_force_critical_with_alert() {
        let monitor = HealthMonitor::builder(HealthConfig::default())
            .with_source(Gauge::new("cache", &[("hit_rate", 0.95)]))
            .with_source(Gauge::new(
                "engine",
                &[("error_rate", 0.4), ("latency_p95_ms", 2_500.0)],
            ))
            .build()
            .unwrap();
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        monitor.on_alert(Arc::new(move |alert: &Alert| {
            if alert.severity == Severity::Critical {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }));

        let evaluation = monitor.tick().await;
        assert!((0.0..=1.0).contains(&evaluation.overall_score));
        assert_eq!(evaluation.status, HealthStatus::Critical);
        assert!(seen.load(Ordering::Relaxed) >= 1);

        // Same condition next tick is suppressed by the cooldown
        let evaluation = monitor.tick().await;
        assert_eq!(evaluation.alerts_fired, 0);
        assert_eq!(monitor.health_report().suppressed_alerts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_recovery_escalates() {
        let monitor = HealthMonitor::builder(fast_recovery())
            .with_source(Gauge::new(
                "cost",
                &[("provider_failure_rate", 0.9), ("error_rate", 0.9)],
            ))
            .with_executor(Arc::new(Failing))
            .build()
            .unwrap();

        let evaluation = monitor.tick().await;
        assert_eq!(
            evaluation.recoveries,
            vec![RecoveryOutcome::Escalated {
                issue: IssueType::ProviderConnectivity,
                attempts: 2,
            }]
        );
        let report = monitor.health_report();
        assert_eq!(report.escalations, 1);
        assert_eq!(report.recoveries.len(), 2);
        assert!(report
            .recent_alerts
            .iter()
            .any(|a| a.metric == "recovery:provider_connectivity" && a.severity == Severity::Critical));
    }

    #[tokio::test]
    async fn trend_follows_scores_and_telemetry_exported() {
        let gauge = Gauge::new("engine", &[("error_rate", 0.0)]);
        let sink = Arc::new(Counting(Mutex::new(Vec::new())));
        let monitor = HealthMonitor::builder(HealthConfig::default())
            .with_source(gauge.clone())
            .with_sink(sink.clone())
            .build()
            .unwrap();

        for _ in 0..3 {
            monitor.tick().await;
        }
        gauge.set(&[("error_rate", 0.10)]);
        for _ in 0..3 {
            monitor.tick().await;
        }
        assert_eq!(monitor.trend(), Trend::Degrading);
        assert_eq!(sink.0.lock().len(), 6);
        assert!((sink.0.lock()[5].metrics["engine.error_rate"] - 0.10).abs() < 1e-9);
    }

    #[tokio::test]
    async fn duplicate_sources_rejected() {
        let result = HealthMonitor::builder(HealthConfig::default())
            .with_source(Gauge::new("cache", &[]))
            .with_source(Gauge::new("cache", &[]))
            .build();
        assert_eq!(result.err(), Some(HealthError::DuplicateSource("cache".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_loop_ticks_until_shutdown() {
        let monitor = Arc::new(
            HealthMonitor::builder(HealthConfig::default().with_interval(Duration::from_secs(1)))
                .with_source(Gauge::new("cache", &[("hit_rate", 0.9)]))
                .build()
                .unwrap(),
        );
        let handle = Arc::clone(&monitor).spawn();
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        handle.shutdown().await;
        let ticks = monitor.history.lock().len();
        assert_eq!(ticks, 4);
    }
}
