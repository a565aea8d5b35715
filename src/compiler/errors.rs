//! # Compile Errors
//!
//! Raised synchronously during query normalization. Compilation aborts on
//! the first failure and is never partially applied.

use thiserror::Error;

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;

/// Query normalization errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    #[error("Unknown data source: {0}")]
    UnknownSource(String),

    #[error("Unknown relationship {name} on source {source_name}")]
    UnknownRelationship { source_name: String, name: String },

    #[error("Function not found: {0}")]
    UnknownFunction(String),

    #[error("Aggregate function {0} is not allowed in a where clause")]
    AggregateInWhere(String),

    #[error("Having clause requires an aggregate function, found {0}")]
    NonAggregateHaving(String),

    #[error("A bare relationship name cannot be queried at the root: {0}")]
    BareRelationshipRoot(String),

    #[error("Alias expansion did not terminate for {0}")]
    AliasCycle(String),

    #[error("Malformed query: {0}")]
    MalformedQuery(String),
}
