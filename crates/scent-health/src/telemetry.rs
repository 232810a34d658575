//! Telemetry export
//!
//! Each tick produces one [`TelemetrySnapshot`] with every collected metric
//! flattened to `component.metric`, handed to an optional sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::scoring::{ComponentHealth, HealthStatus};

/// Flattened metrics of one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Tick time
    pub timestamp: DateTime<Utc>,
    /// `component.metric` to value, plus `component.score` per component
    pub metrics: BTreeMap<String, f64>,
    /// Composite score
    pub score: f64,
    /// Overall status
    pub status: HealthStatus,
}

impl TelemetrySnapshot {
    /// Flatten scored components
    #[must_use]
    pub fn from_components(
        components: &[ComponentHealth],
        score: f64,
        status: HealthStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut metrics = BTreeMap::new();
        for component in components {
            for (name, value) in &component.metrics {
                metrics.insert(format!("{}.{name}", component.component), *value);
            }
            metrics.insert(format!("{}.score", component.component), component.score);
        }
        Self {
            timestamp,
            metrics,
            score,
            status,
        }
    }
}

/// Destination for telemetry snapshots
///
/// Called from the monitor task; implementations should hand off slow I/O.
pub trait TelemetrySink: Send + Sync {
    /// Sink name for logs
    fn name(&self) -> &str;

    /// Export one snapshot
    fn export(&self, snapshot: &TelemetrySnapshot);

    /// Flush buffered snapshots
    fn flush(&self) {}
}

/// Sink writing snapshots as structured log events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn export(&self, snapshot: &TelemetrySnapshot) {
        tracing::info!(
            target: "scent_health::telemetry",
            score = snapshot.score,
            status = %snapshot.status,
            metrics = snapshot.metrics.len(),
            "health snapshot"
        );
        for (name, value) in &snapshot.metrics {
            tracing::debug!(target: "scent_health::telemetry", metric = %name, value, "metric");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthConfig;
    use crate::scoring::score_component;

    #[test]
    fn snapshot_flattens_component_metrics() {
        let now = Utc::now();
        let cache = score_component(
            "cache",
            BTreeMap::from([("hit_rate".to_string(), 0.9)]),
            &HealthConfig::default(),
            now,
        );
        let snapshot = TelemetrySnapshot::from_components(&[cache], 1.0, HealthStatus::Healthy, now);
        assert_eq!(snapshot.metrics["cache.hit_rate"], 0.9);
        assert_eq!(snapshot.metrics["cache.score"], 1.0);
        TracingSink.export(&snapshot);
    }
}
