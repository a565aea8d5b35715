//! # Condition Algebra Errors

use thiserror::Error;

/// Result type for condition algebra operations
pub type ConditionResult<T> = Result<T, ConditionError>;

/// Errors raised while resolving condition operands
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConditionError {
    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),
}
