//! Query compiler
//!
//! Normalizes a parsed query against the relationship graph and function
//! table into an execution-ready `PreparedQuery`.

mod compiler;
mod errors;
mod graph;

pub use compiler::{
    compile, Binding, CompiledSelectItem, CompilerEnv, FieldRegistry, PreparedQuery,
    PreparedSubQuery,
};
pub use errors::{CompileError, CompileResult};
pub use graph::{
    JoinDirection, NamingRules, PathNode, Relationship, RelationshipGraph, ResolverTree,
};
