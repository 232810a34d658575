//! Budget ceilings per rolling window

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CostError;
use crate::ledger::{CostLedger, Reservation, Window};

/// Spend ceilings; an absent ceiling is unlimited
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Ceiling for the last hour
    pub hourly: Option<Decimal>,
    /// Ceiling for the last 24 hours
    pub daily: Option<Decimal>,
    /// Ceiling for the last 7 days
    pub weekly: Option<Decimal>,
    /// Ceiling for the last 30 days
    pub monthly: Option<Decimal>,
}

impl BudgetConfig {
    /// Set the daily ceiling
    #[must_use]
    pub fn with_daily(mut self, ceiling: Decimal) -> Self {
        self.daily = Some(ceiling);
        self
    }

    /// Set the hourly ceiling
    #[must_use]
    pub fn with_hourly(mut self, ceiling: Decimal) -> Self {
        self.hourly = Some(ceiling);
        self
    }

    /// Set the monthly ceiling
    #[must_use]
    pub fn with_monthly(mut self, ceiling: Decimal) -> Self {
        self.monthly = Some(ceiling);
        self
    }

    /// Ceiling for a window
    #[must_use]
    pub fn ceiling(&self, window: Window) -> Option<Decimal> {
        match window {
            Window::Hour => self.hourly,
            Window::Day => self.daily,
            Window::Week => self.weekly,
            Window::Month => self.monthly,
        }
    }

    /// Configured `(window, ceiling)` pairs, shortest window first
    pub fn ceilings(&self) -> impl Iterator<Item = (Window, Decimal)> + '_ {
        Window::ALL
            .into_iter()
            .filter_map(|w| self.ceiling(w).map(|c| (w, c)))
    }

    /// Reject negative ceilings
    pub fn validate(&self) -> Result<(), CostError> {
        for (window, ceiling) in self.ceilings() {
            if ceiling.is_sign_negative() {
                return Err(CostError::InvalidConfig(format!(
                    "{window} ceiling must not be negative"
                )));
            }
        }
        Ok(())
    }

    /// Fail with the first window whose ceiling `projected` would cross
    ///
    /// Outstanding reservations count as spend.
    pub fn check(
        &self,
        ledger: &CostLedger,
        projected: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), CostError> {
        ledger.check(&self.ceilings().collect::<Vec<_>>(), projected, now)
    }

    /// Hold `projected` against every ceiling, or fail like [`Self::check`]
    pub fn reserve<'a>(
        &self,
        ledger: &'a CostLedger,
        projected: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Reservation<'a>, CostError> {
        ledger.try_reserve(projected, &self.ceilings().collect::<Vec<_>>(), now)
    }

    /// Smallest headroom across windows; `None` when unlimited
    #[must_use]
    pub fn remaining(&self, ledger: &CostLedger, now: DateTime<Utc>) -> Option<Decimal> {
        self.ceilings()
            .map(|(window, ceiling)| (ceiling - ledger.committed_in(window, now)).max(Decimal::ZERO))
            .min()
    }

    /// Highest `spend / ceiling` across windows, 0 when unlimited
    #[must_use]
    pub fn utilization(&self, ledger: &CostLedger, now: DateTime<Utc>) -> f64 {
        use rust_decimal::prelude::ToPrimitive;

        self.ceilings()
            .map(|(window, ceiling)| {
                if ceiling.is_zero() {
                    1.0
                } else {
                    (ledger.spend_in(window, now) / ceiling).to_f64().unwrap_or(1.0)
                }
            })
            .fold(0.0, f64::max)
    }
}
