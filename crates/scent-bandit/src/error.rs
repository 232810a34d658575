//! Error types for the bandit selector

/// Bandit errors
///
/// Corrupted arm state is repaired in place and only reported through logs;
/// these variants cover caller mistakes.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BanditError {
    /// Arm name not recognised
    #[error("unknown arm: '{0}'")]
    UnknownArm(String),

    /// Arm state had invalid posterior parameters and was reset
    #[error("corrupted state for arm {arm}: alpha={alpha}, beta={beta}")]
    StateCorruption {
        /// Affected arm
        arm: String,
        /// Stored alpha
        alpha: f64,
        /// Stored beta
        beta: f64,
    },

    /// Configuration is unusable
    #[error("invalid bandit configuration: {0}")]
    InvalidConfig(String),
}
