//! # Execution Errors
//!
//! Any failure during an execution aborts the whole query; partial result
//! sets are never returned.

use thiserror::Error;

use crate::compiler::CompileError;
use crate::conditions::ConditionError;
use crate::functions::FunctionError;

/// Result type for query execution
pub type ExecuteResult<T> = Result<T, ExecuteError>;

/// The error a resolver callback reports back to the engine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("{0}")]
    Message(String),
}

impl ResolveError {
    pub fn msg(message: impl Into<String>) -> Self {
        ResolveError::Message(message.into())
    }
}

/// Query execution errors
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Function(#[from] FunctionError),

    #[error(transparent)]
    Condition(#[from] ConditionError),

    #[error("No resolver registered for source {0}")]
    NoResolver(String),

    #[error("Resolver for source {source_name} failed: {message}")]
    Resolver { source_name: String, message: String },

    #[error("Grouping error: {0}")]
    Grouping(String),
}

impl ExecuteError {
    pub(crate) fn resolver(source: &str, err: ResolveError) -> Self {
        ExecuteError::Resolver {
            source_name: source.to_string(),
            message: err.to_string(),
        }
    }
}
