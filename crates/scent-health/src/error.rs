//! Error types for health monitoring and recovery

use crate::recovery::RecoveryAction;

/// Monitor construction errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HealthError {
    /// Configuration is unusable
    #[error("invalid health configuration: {0}")]
    InvalidConfig(String),

    /// Two sources report under the same component name
    #[error("duplicate health source: {0}")]
    DuplicateSource(String),
}

/// Failures of a single recovery action
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecoveryError {
    /// The action ran and did not fix the issue
    #[error("{action} failed: {reason}")]
    Failed {
        /// Action attempted
        action: RecoveryAction,
        /// Executor message
        reason: String,
    },

    /// The executor cannot perform this action
    #[error("{0} is not supported by this executor")]
    Unsupported(RecoveryAction),

    /// The action exceeded its timeout
    #[error("{action} timed out after {timeout_ms}ms")]
    Timeout {
        /// Action attempted
        action: RecoveryAction,
        /// Configured timeout
        timeout_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_error_names_action() {
        let err = RecoveryError::Failed {
            action: RecoveryAction::FailoverProvider,
            reason: "no standby".into(),
        };
        assert_eq!(err.to_string(), "failover_provider failed: no standby");
    }
}
