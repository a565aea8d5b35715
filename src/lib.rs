//! fedquery - A federated query engine over pluggable data-source resolvers
//!
//! Queries are compiled once against a relationship graph, then executed
//! by driving per-source resolver callbacks and joining, filtering,
//! grouping, and sorting the fetched records in-process.

pub mod ast;
pub mod compiler;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod functions;
pub mod observability;
pub mod util;

pub use engine::{QueryEngine, QueryEngineBuilder};
