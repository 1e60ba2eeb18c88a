//! Error types for learner operations
//!
//! Shape and lifecycle violations surface as [`LearnerError`] values instead
//! of panics, so callers can distinguish recoverable misuse (predicting
//! before `fit`) from configuration mistakes.

use std::fmt;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;

/// Result type alias for learner operations
pub type LearnerResult<T> = Result<T, LearnerError>;

/// Error type shared by all learner variants
#[derive(Debug)]
pub enum LearnerError {
    /// Invalid construction-time or fit-time configuration
    Config(ConfigError),

    /// Feature dimensionality or batch shape disagrees with the fitted state
    ShapeMismatch {
        expected: usize,
        got: usize,
        context: String,
    },

    /// An operation that requires a fitted model was called before `fit`
    NotFitted { operation: String },

    /// Preference labels are inconsistent with the query sets they describe
    InvalidLabels { context: String, details: String },

    /// An input batch contained no instances or no objects
    EmptyBatch { context: String },

    /// Failure while persisting or restoring trainable weights
    Checkpoint(CheckpointError),
}

impl fmt::Display for LearnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearnerError::Config(err) => write!(f, "Configuration error: {}", err),
            LearnerError::ShapeMismatch {
                expected,
                got,
                context,
            } => {
                write!(
                    f,
                    "Shape mismatch in {}: expected {}, got {}",
                    context, expected, got
                )
            }
            LearnerError::NotFitted { operation } => {
                write!(
                    f,
                    "Model not fitted: operation '{}' requires a trained model. Call fit() first.",
                    operation
                )
            }
            LearnerError::InvalidLabels { context, details } => {
                write!(f, "Invalid preference labels in {}: {}", context, details)
            }
            LearnerError::EmptyBatch { context } => {
                write!(f, "Empty batch: {}", context)
            }
            LearnerError::Checkpoint(err) => write!(f, "Weight persistence failed: {}", err),
        }
    }
}

impl std::error::Error for LearnerError {}

impl From<ConfigError> for LearnerError {
    fn from(err: ConfigError) -> Self {
        LearnerError::Config(err)
    }
}

impl From<CheckpointError> for LearnerError {
    fn from(err: CheckpointError) -> Self {
        LearnerError::Checkpoint(err)
    }
}

// Convenience constructors for common error patterns
impl LearnerError {
    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: usize, got: usize, context: impl Into<String>) -> Self {
        LearnerError::ShapeMismatch {
            expected,
            got,
            context: context.into(),
        }
    }

    /// Create a not fitted error
    pub fn not_fitted(operation: impl Into<String>) -> Self {
        LearnerError::NotFitted {
            operation: operation.into(),
        }
    }

    /// Create an invalid labels error
    pub fn invalid_labels(context: impl Into<String>, details: impl Into<String>) -> Self {
        LearnerError::InvalidLabels {
            context: context.into(),
            details: details.into(),
        }
    }

    /// Create an empty batch error
    pub fn empty_batch(context: impl Into<String>) -> Self {
        LearnerError::EmptyBatch {
            context: context.into(),
        }
    }
}
