//! Append-only cost ledger with rolling windows
//!
//! Records are grouped into hour buckets that carry a running spend total, so
//! a window query sums whole buckets and only scans records in the two
//! partial buckets at its edges. Per-provider lifetime totals are kept
//! alongside and never shrink when old buckets are pruned.
//!
//! Budget-bound callers reserve their projected cost with
//! [`CostLedger::try_reserve`]: the ceiling check and the reservation happen
//! under one lock, and reserved amounts count against every window until the
//! [`Reservation`] is settled or dropped.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::CostError;

/// Default retention for individual records
pub const DEFAULT_RETENTION_DAYS: i64 = 31;

const BUCKET_SECS: i64 = 3_600;

/// One priced provider call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// Provider name
    pub provider: String,
    /// Tokens billed
    pub tokens: u64,
    /// Dollar cost
    pub cost_usd: Decimal,
    /// When the call completed
    pub timestamp: DateTime<Utc>,
}

/// Rolling aggregation window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    /// Last 60 minutes
    Hour,
    /// Last 24 hours
    Day,
    /// Last 7 days
    Week,
    /// Last 30 days
    Month,
}

impl Window {
    /// Every window, shortest first
    pub const ALL: [Window; 4] = [Window::Hour, Window::Day, Window::Week, Window::Month];

    /// Window length
    #[must_use]
    pub fn duration(&self) -> Duration {
        match self {
            Window::Hour => Duration::hours(1),
            Window::Day => Duration::days(1),
            Window::Week => Duration::days(7),
            Window::Month => Duration::days(30),
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Window::Hour => "hour",
            Window::Day => "day",
            Window::Week => "week",
            Window::Month => "month",
        })
    }
}

/// Lifetime totals for one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderTotals {
    /// Tokens billed
    pub tokens: u64,
    /// Dollar cost
    pub cost_usd: Decimal,
    /// Calls recorded, failed attempts included
    pub calls: u64,
}

fn bucket_of(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp().div_euclid(BUCKET_SECS)
}

#[derive(Debug, Default)]
struct Bucket {
    spend: Decimal,
    records: Vec<CostRecord>,
}

#[derive(Debug, Default)]
struct LedgerState {
    buckets: BTreeMap<i64, Bucket>,
    len: usize,
    totals: BTreeMap<String, ProviderTotals>,
    reserved: Decimal,
}

impl LedgerState {
    fn append(&mut self, record: CostRecord, retention: Duration) {
        let cutoff = record.timestamp - retention;
        let totals = self.totals.entry(record.provider.clone()).or_default();
        totals.tokens += record.tokens;
        totals.cost_usd += record.cost_usd;
        totals.calls += 1;

        let bucket = self.buckets.entry(bucket_of(record.timestamp)).or_default();
        bucket.spend += record.cost_usd;
        bucket.records.push(record);
        self.len += 1;
        self.prune(cutoff);
    }

    fn prune(&mut self, cutoff: DateTime<Utc>) {
        let first_kept = bucket_of(cutoff);
        let kept = self.buckets.split_off(&first_kept);
        let dropped = std::mem::replace(&mut self.buckets, kept);
        self.len -= dropped.values().map(|b| b.records.len()).sum::<usize>();

        if let Some(edge) = self.buckets.get_mut(&first_kept) {
            let before = edge.records.len();
            edge.records.retain(|r| r.timestamp >= cutoff);
            if edge.records.len() != before {
                edge.spend = edge.records.iter().map(|r| r.cost_usd).sum();
                self.len -= before - edge.records.len();
            }
        }
    }

    /// Records with `start < timestamp <= end`
    fn records_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Iterator<Item = &CostRecord> + '_ {
        let first = bucket_of(start);
        self.buckets
            .range(first..=bucket_of(end).max(first))
            .flat_map(|(_, bucket)| bucket.records.iter())
            .filter(move |r| r.timestamp > start && r.timestamp <= end)
    }

    fn spend_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Decimal {
        if end <= start {
            return Decimal::ZERO;
        }
        let (first, last) = (bucket_of(start), bucket_of(end));
        self.buckets
            .range(first..=last)
            .map(|(&index, bucket)| {
                if index > first && index < last {
                    bucket.spend
                } else {
                    bucket
                        .records
                        .iter()
                        .filter(|r| r.timestamp > start && r.timestamp <= end)
                        .map(|r| r.cost_usd)
                        .sum()
                }
            })
            .sum()
    }

    fn committed_in(&self, window: Window, now: DateTime<Utc>) -> Decimal {
        self.spend_between(now - window.duration(), now) + self.reserved
    }

    fn check(
        &self,
        ceilings: &[(Window, Decimal)],
        projected: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), CostError> {
        for &(window, ceiling) in ceilings {
            let total = self.committed_in(window, now) + projected;
            if total > ceiling {
                return Err(CostError::BudgetExceeded {
                    window,
                    ceiling,
                    projected: total,
                });
            }
        }
        Ok(())
    }
}

/// Thread-safe cost ledger
#[derive(Debug)]
pub struct CostLedger {
    state: Mutex<LedgerState>,
    retention: Duration,
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new(Duration::days(DEFAULT_RETENTION_DAYS))
    }
}

impl CostLedger {
    /// Ledger keeping records for `retention`
    #[must_use]
    pub fn new(retention: Duration) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            retention,
        }
    }

    /// Append a record and prune records older than the retention period
    pub fn append(&self, record: CostRecord) {
        self.state.lock().append(record, self.retention);
    }

    /// Reserve `amount` if no ceiling would be crossed
    ///
    /// Settled and reserved spend both count, so concurrent reservations can
    /// never jointly overrun a ceiling.
    pub fn try_reserve(
        &self,
        amount: Decimal,
        ceilings: &[(Window, Decimal)],
        now: DateTime<Utc>,
    ) -> Result<Reservation<'_>, CostError> {
        let mut state = self.state.lock();
        state.check(ceilings, amount, now)?;
        state.reserved += amount;
        Ok(Reservation {
            ledger: self,
            amount,
            active: true,
        })
    }

    /// Fail with the first ceiling `projected` more spend would cross
    pub fn check(
        &self,
        ceilings: &[(Window, Decimal)],
        projected: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), CostError> {
        self.state.lock().check(ceilings, projected, now)
    }

    /// Amount held by outstanding reservations
    #[must_use]
    pub fn reserved(&self) -> Decimal {
        self.state.lock().reserved
    }

    /// Lifetime cost across providers
    #[must_use]
    pub fn total_cost(&self) -> Decimal {
        self.state.lock().totals.values().map(|t| t.cost_usd).sum()
    }

    /// Lifetime totals of one provider
    #[must_use]
    pub fn provider_totals(&self, provider: &str) -> ProviderTotals {
        self.state
            .lock()
            .totals
            .get(provider)
            .cloned()
            .unwrap_or_default()
    }

    /// Lifetime totals of every provider
    #[must_use]
    pub fn all_totals(&self) -> BTreeMap<String, ProviderTotals> {
        self.state.lock().totals.clone()
    }

    /// Spend with `start < timestamp <= end`
    #[must_use]
    pub fn spend_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Decimal {
        self.state.lock().spend_between(start, end)
    }

    /// Spend in a rolling window ending at `now`
    #[must_use]
    pub fn spend_in(&self, window: Window, now: DateTime<Utc>) -> Decimal {
        self.spend_between(now - window.duration(), now)
    }

    /// Spend in a window plus outstanding reservations
    #[must_use]
    pub fn committed_in(&self, window: Window, now: DateTime<Utc>) -> Decimal {
        self.state.lock().committed_in(window, now)
    }

    /// Tokens per provider with `start < timestamp <= end`
    #[must_use]
    pub fn tokens_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> BTreeMap<String, u64> {
        let state = self.state.lock();
        let mut by_provider = BTreeMap::new();
        for record in state.records_between(start, end) {
            *by_provider.entry(record.provider.clone()).or_insert(0) += record.tokens;
        }
        by_provider
    }

    /// Number of sample-sized buckets in `(start, end]` holding any record
    #[must_use]
    pub fn active_buckets(&self, start: DateTime<Utc>, end: DateTime<Utc>, bucket: Duration) -> usize {
        let bucket_ms = bucket.num_milliseconds();
        if bucket_ms <= 0 {
            return 0;
        }
        let state = self.state.lock();
        state
            .records_between(start, end)
            .map(|r| (r.timestamp - start).num_milliseconds() / bucket_ms)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Records currently retained
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    /// No records retained
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Budget held for an in-flight call
///
/// Dropping it releases the amount; [`Reservation::settle`] swaps it for the
/// actual record under the same lock.
#[derive(Debug)]
#[must_use = "dropping a reservation releases it"]
pub struct Reservation<'a> {
    ledger: &'a CostLedger,
    amount: Decimal,
    active: bool,
}

impl Reservation<'_> {
    /// Amount held
    #[inline]
    #[must_use]
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Release the hold and append the actual cost
    pub fn settle(mut self, record: CostRecord) {
        let mut state = self.ledger.state.lock();
        state.reserved -= self.amount;
        state.append(record, self.ledger.retention);
        self.active = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.active {
            self.ledger.state.lock().reserved -= self.amount;
        }
    }
}
