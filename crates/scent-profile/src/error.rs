//! Error types for profile building, similarity search and stores

/// Errors raised while validating profile inputs
///
/// The builder never propagates these to callers: invalid input is repaired
/// or replaced by the default profile. They exist so the repair can be logged
/// and tested.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProfileError {
    /// No responses were supplied, or none survived sanitizing
    #[error("no usable quiz responses")]
    EmptyResponses,

    /// A trait weight was negative, NaN or infinite
    #[error("invalid weight {weight} for trait '{trait_name}'")]
    InvalidWeight {
        /// Trait the weight belonged to
        trait_name: String,
        /// Offending weight
        weight: f64,
    },

    /// A profile vector did not have the fixed dimension
    #[error("profile vector must have {expected} dimensions, got {actual}")]
    DimensionMismatch {
        /// Required dimension
        expected: usize,
        /// Supplied dimension
        actual: usize,
    },
}

/// Errors from external profile/content stores
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Store did not answer within the configured budget
    #[error("store timed out after {0}ms")]
    Timeout(u64),

    /// Store is unreachable or returned a failure
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Requested record does not exist
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Errors during similarity search
#[derive(Debug, Clone, thiserror::Error)]
pub enum SimilarityError {
    /// Candidate retrieval failed
    #[error("candidate retrieval failed: {0}")]
    Store(#[from] StoreError),

    /// Search options are out of range
    #[error("invalid similarity options: {0}")]
    InvalidOptions(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_display() {
        let err = ProfileError::DimensionMismatch {
            expected: 256,
            actual: 3,
        };
        assert_eq!(err.to_string(), "profile vector must have 256 dimensions, got 3");
    }

    #[test]
    fn store_error_converts_into_similarity_error() {
        let err: SimilarityError = StoreError::Timeout(150).into();
        assert!(matches!(err, SimilarityError::Store(StoreError::Timeout(150))));
        assert!(err.to_string().contains("150ms"));
    }
}
