//! # Function Errors

use thiserror::Error;

/// Result type for function operations
pub type FunctionResult<T> = Result<T, FunctionError>;

/// Function dispatch and evaluation errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FunctionError {
    #[error("Function not found: {0}")]
    NotFound(String),

    #[error("Function already exists: {0}")]
    AlreadyExists(String),

    #[error("Aggregate function {0} is not allowed outside grouping")]
    AggregateOutsideGrouping(String),

    #[error("Aggregate function is needed: {0} references non-grouped fields")]
    AggregateNeeded(String),

    #[error("Immediate function {0} must not reference record fields")]
    FieldInImmediate(String),

    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    #[error("Function {0} failed: {1}")]
    Evaluation(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = FunctionError::NotFound("calc_foo".into());
        assert_eq!(err.to_string(), "Function not found: calc_foo");

        let err = FunctionError::ParameterNotFound("p".into());
        assert_eq!(err.to_string(), "Parameter not found: p");
    }
}
