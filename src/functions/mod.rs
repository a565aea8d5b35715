//! Function registry and dispatch
//!
//! Classifies and invokes the three function kinds (scalar,
//! immediate-scalar, aggregate) and memoizes per-node dispatch decisions.

mod dispatch;
mod errors;
mod registry;

pub use dispatch::{
    atom_to_value, eval_group_call, eval_immediate_call, eval_row_call, DispatchCache,
    DispatchShape, ResolvedValue,
};
pub use errors::{FunctionError, FunctionResult};
pub use registry::{FunctionBody, FunctionDef, FunctionKind, FunctionTable, GroupFn, RowFn};
