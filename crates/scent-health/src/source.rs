//! Metric sources

use std::collections::BTreeMap;

/// A component that reports health metrics
///
/// `collect` runs on every tick and must be cheap: read counters, do not
/// query remote systems.
pub trait HealthSource: Send + Sync {
    /// Component name, unique per monitor
    fn component(&self) -> &str;

    /// Current metric values
    fn collect(&self) -> BTreeMap<String, f64>;
}
