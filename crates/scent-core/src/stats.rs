//! Request path counters

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::types::RequestSummary;

/// Latency samples kept for percentiles
pub const LATENCY_WINDOW: usize = 1_000;

/// Counters shared by the request path and its health source
#[derive(Debug, Default)]
pub struct RequestStats {
    total: AtomicU64,
    errors: AtomicU64,
    degraded: AtomicU64,
    store_calls: AtomicU64,
    store_errors: AtomicU64,
    in_flight: AtomicUsize,
    latencies: Mutex<VecDeque<f64>>,
}

/// Marks a request in flight until dropped
#[derive(Debug)]
pub struct InFlight<'a> {
    stats: &'a RequestStats,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RequestStats {
    /// Empty counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a request; returns the guard and the depth including it
    pub fn enter(&self) -> (InFlight<'_>, usize) {
        let depth = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        (InFlight { stats: self }, depth)
    }

    /// Record a finished request
    pub fn record(&self, latency_ms: f64, ok: bool, degraded: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        if degraded {
            self.degraded.fetch_add(1, Ordering::Relaxed);
        }
        let mut latencies = self.latencies.lock();
        if latencies.len() == LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(latency_ms);
    }

    /// Record one profile or catalog store call
    pub fn record_store_call(&self, ok: bool) {
        self.store_calls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.store_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Requests in flight
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// `(requests, errors)` since start
    #[must_use]
    pub fn request_counts(&self) -> (u64, u64) {
        (self.total.load(Ordering::Relaxed), self.errors.load(Ordering::Relaxed))
    }

    /// `(store calls, store errors)` since start
    #[must_use]
    pub fn store_counts(&self) -> (u64, u64) {
        (
            self.store_calls.load(Ordering::Relaxed),
            self.store_errors.load(Ordering::Relaxed),
        )
    }

    /// Nearest-rank 95th percentile of recent latencies
    #[must_use]
    pub fn p95_latency_ms(&self) -> f64 {
        let mut samples: Vec<f64> = self.latencies.lock().iter().copied().collect();
        if samples.is_empty() {
            return 0.0;
        }
        samples.sort_by(f64::total_cmp);
        let rank = (samples.len() * 95).div_ceil(100).max(1);
        samples[rank - 1]
    }

    /// Snapshot for reports
    #[must_use]
    pub fn summary(&self) -> RequestSummary {
        let avg_latency_ms = {
            let latencies = self.latencies.lock();
            if latencies.is_empty() {
                0.0
            } else {
                latencies.iter().sum::<f64>() / latencies.len() as f64
            }
        };
        RequestSummary {
            total: self.total.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            avg_latency_ms,
            p95_latency_ms: self.p95_latency_ms(),
        }
    }
}

/// Failure rate over the interval since the previous call
///
/// Counters are lifetime totals; rates must recover once failures stop, so
/// each collection only looks at the delta.
#[derive(Debug, Default)]
pub struct RateWindow {
    last: Mutex<(u64, u64)>,
}

impl RateWindow {
    /// Rate of `failures` over `total` since the last call; `None` without new events
    pub fn rate(&self, total: u64, failures: u64) -> Option<f64> {
        self.rate_at_least(total, failures, 1)
    }

    /// Like [`Self::rate`], but waits for `min_events` before reporting
    ///
    /// Events below the minimum carry over to the next call.
    pub fn rate_at_least(&self, total: u64, failures: u64, min_events: u64) -> Option<f64> {
        let mut last = self.last.lock();
        let (prev_total, prev_failures) = *last;
        let events = total.saturating_sub(prev_total);
        if events == 0 || events < min_events {
            return None;
        }
        *last = (total, failures);
        let failed = failures.saturating_sub(prev_failures);
        Some((failed as f64 / events as f64).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_guard_decrements() {
        let stats = RequestStats::new();
        {
            let (_a, depth_a) = stats.enter();
            let (_b, depth_b) = stats.enter();
            assert_eq!((depth_a, depth_b), (1, 2));
            assert_eq!(stats.in_flight(), 2);
        }
        assert_eq!(stats.in_flight(), 0);
    }

    #[test]
    fn summary_reports_latency_percentiles() {
        let stats = RequestStats::new();
        for ms in 1..=100 {
            stats.record(f64::from(ms), ms != 100, ms % 10 == 0);
        }
        let summary = stats.summary();
        assert_eq!(summary.total, 100);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.degraded, 10);
        assert!((summary.avg_latency_ms - 50.5).abs() < 1e-9);
        assert_eq!(summary.p95_latency_ms, 95.0);
    }

    #[test]
    fn latency_window_is_bounded() {
        let stats = RequestStats::new();
        for _ in 0..LATENCY_WINDOW + 10 {
            stats.record(1.0, true, false);
        }
        assert_eq!(stats.latencies.lock().len(), LATENCY_WINDOW);
    }

    #[test]
    fn rate_window_uses_deltas() {
        let window = RateWindow::default();
        assert_eq!(window.rate(10, 5), Some(0.5));
        assert_eq!(window.rate(10, 5), None);
        assert_eq!(window.rate(20, 5), Some(0.0));
    }

    #[test]
    fn rate_window_waits_for_enough_events() {
        let window = RateWindow::default();
        assert_eq!(window.rate_at_least(5, 5, 20), None);
        assert_eq!(window.rate_at_least(20, 10, 20), Some(0.5));
    }
}
