//! Error types for cost governance and AI providers

use rust_decimal::Decimal;

use crate::ledger::Window;

/// Cost governor errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CostError {
    /// Projected spend would cross a budget ceiling
    #[error("{window} budget exceeded: projected ${projected} over ceiling ${ceiling}")]
    BudgetExceeded {
        /// Window whose ceiling is crossed
        window: Window,
        /// Configured ceiling
        ceiling: Decimal,
        /// Spend in the window including the projected cost
        projected: Decimal,
    },

    /// Provider name not registered
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// No provider satisfies the workload constraints
    #[error("no eligible provider: {0}")]
    NoEligibleProvider(String),

    /// Configuration is unusable
    #[error("invalid cost configuration: {0}")]
    InvalidConfig(String),
}

/// AI provider call failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Call exceeded its timeout
    #[error("provider {provider} timed out after {timeout_ms}ms")]
    Timeout {
        /// Provider name
        provider: String,
        /// Configured timeout
        timeout_ms: u64,
    },

    /// Provider unreachable or returned a server error
    #[error("provider {provider} unavailable: {reason}")]
    Unavailable {
        /// Provider name
        provider: String,
        /// Failure detail
        reason: String,
    },

    /// Provider throttled the request
    #[error("provider {0} rate limited")]
    RateLimited(String),

    /// Response could not be used
    #[error("provider {provider} returned an invalid response: {reason}")]
    InvalidResponse {
        /// Provider name
        provider: String,
        /// Failure detail
        reason: String,
    },
}

impl ProviderError {
    /// Provider the error came from
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::Timeout { provider, .. }
            | Self::Unavailable { provider, .. }
            | Self::InvalidResponse { provider, .. } => provider,
            Self::RateLimited(provider) => provider,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn budget_error_display() {
        let err = CostError::BudgetExceeded {
            window: Window::Day,
            ceiling: dec!(10.00),
            projected: dec!(10.27),
        };
        assert_eq!(
            err.to_string(),
            "day budget exceeded: projected $10.27 over ceiling $10.00"
        );
    }

    #[test]
    fn provider_name_accessor() {
        let err = ProviderError::RateLimited("standard".into());
        assert_eq!(err.provider(), "standard");
    }
}
