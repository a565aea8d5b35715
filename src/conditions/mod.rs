//! Condition algebra
//!
//! Flattening, resolver-scoped pruning, index-field extraction, and
//! dialect string rendering over the condition AST.

mod algebra;
mod errors;
mod render;

pub use algebra::{
    extract_index_eligible, flatten, flatten_to_and_list, prune_to_source, LogicalKind,
};
pub use errors::{ConditionError, ConditionResult};
pub use render::{render_and_list, render_condition, Dialect, RawDialect};
