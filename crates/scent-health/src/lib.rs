//! Scent Health - monitoring, alerting and automated recovery
//!
//! ```text
//! HealthSource ──collect──► scoring ──► alerts (cooldown) ──► on_alert handlers
//!                              │
//!                              ├─critical─► RecoveryCoordinator ──► RecoveryExecutor
//!                              │                 └─exhausted─► escalation alert
//!                              └──────────► history (trend) + TelemetrySink
//! ```
//!
//! Components expose counters through [`HealthSource`]; the monitor scores
//! them against [`MetricThreshold`]s, maps critical metrics to
//! [`IssueType`]s via [`IssueRule`]s and runs bounded recovery whose action
//! order is learned from past attempts.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod alert;
pub mod config;
pub mod error;
pub mod monitor;
pub mod recovery;
pub mod scoring;
pub mod source;
pub mod telemetry;

pub use alert::{Alert, AlertHandler, AlertManager, Severity};
pub use config::{Direction, HealthConfig, IssueRule, MetricThreshold, RecoveryConfig};
pub use error::{HealthError, RecoveryError};
pub use monitor::{
    HealthEvaluation, HealthMonitor, HealthMonitorBuilder, HealthReport, MonitorHandle, Trend,
};
pub use recovery::{
    ActionStats, IssueType, RecoveryAction, RecoveryAttempt, RecoveryCoordinator,
    RecoveryExecutor, RecoveryOutcome,
};
pub use scoring::{ComponentHealth, HealthStatus, MetricEvaluation, MetricLevel};
pub use source::HealthSource;
pub use telemetry::{TelemetrySink, TelemetrySnapshot, TracingSink};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// Provider failure rate that drops once failover runs
    struct Fleet {
        failure_rate: Mutex<f64>,
    }

    impl HealthSource for Fleet {
        fn component(&self) -> &str {
            "cost"
        }

        fn collect(&self) -> BTreeMap<String, f64> {
            BTreeMap::from([("provider_failure_rate".to_string(), *self.failure_rate.lock())])
        }
    }

    #[async_trait]
    impl RecoveryExecutor for Fleet {
        async fn execute(&self, action: RecoveryAction, _issue: IssueType) -> Result<(), RecoveryError> {
            if action == RecoveryAction::FailoverProvider {
                *self.failure_rate.lock() = 0.0;
                Ok(())
            } else {
                Err(RecoveryError::Unsupported(action))
            }
        }
    }

    #[tokio::test]
    async fn recovery_restores_health() {
        let fleet = Arc::new(Fleet {
            failure_rate: Mutex::new(0.8),
        });
        let monitor = HealthMonitor::builder(HealthConfig::default())
            .with_source(fleet.clone())
            .with_executor(fleet.clone())
            .build()
            .unwrap();

        let degraded = monitor.tick().await;
        assert_eq!(degraded.status, HealthStatus::Critical);
        assert_eq!(
            degraded.recoveries,
            vec![RecoveryOutcome::Resolved {
                issue: IssueType::ProviderConnectivity,
                action: RecoveryAction::FailoverProvider,
                attempts: 1,
            }]
        );

        let recovered = monitor.tick().await;
        assert_eq!(recovered.status, HealthStatus::Healthy);

        let report = monitor.health_report();
        assert_eq!(report.escalations, 0);
        assert_eq!(report.recoveries.len(), 1);
        assert_eq!(report.trend, Trend::Improving);
        let alert = &report.recent_alerts[0];
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.suggested_actions[0], "failover_provider");
    }
}
