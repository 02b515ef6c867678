//! Error types shared by every analysis operation

use thiserror::Error;

/// Failure of an analysis run
///
/// Every top-level operation (main analysis, sensitivity sweep, dropout
/// estimation) reports exactly one of these on failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// The inputs do not describe an analyzable case (missing locus, malformed profile)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A parameter is outside its valid domain
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// A ratio is 0, infinite or not a number
    #[error(
        "Numeric degeneracy at {subject}: Pr(E|Hp) = {prosecution:e}, Pr(E|Hd) = {defense:e} (check for a dropout or drop-in probability of 0 where one is required)"
    )]
    NumericDegeneracy {
        subject: String,
        prosecution: f64,
        defense: f64,
    },

    /// A sensitivity sweep in which every point was degenerate
    #[error("Sensitivity sweep from {from:.2} to {to:.2} produced no valid point")]
    EmptySweep { from: f64, to: f64 },

    /// The run was interrupted by a cancellation request
    #[error("Analysis cancelled")]
    Cancelled,

    /// The Monte-Carlo estimator recorded no successful iteration
    #[error("Dropout estimation failed for {hypothesis}: no iteration reproduced the observed allele count")]
    EstimationFailure { hypothesis: String },

    /// The worker pool could not be created
    #[error("Worker pool error: {message}")]
    WorkerPool { message: String },

    /// A submitted task ended without reporting a result
    #[error("Analysis task ended without a result")]
    TaskLost,
}

/// Type alias for Results using AnalysisError
pub type Result<T> = std::result::Result<T, AnalysisError>;

impl AnalysisError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Whether this failure is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this failure stems from degenerate numbers
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Self::NumericDegeneracy { .. } | Self::EmptySweep { .. })
    }
}
