//! Query execution
//!
//! Fetch orchestration, in-process condition evaluation, grouping,
//! sorting, and result shaping for prepared queries.

mod errors;
mod executor;
mod filters;
mod grouping;
mod sorter;

pub use errors::{ExecuteError, ExecuteResult, ResolveError};
pub use filters::{ConditionEvaluator, EvalScope, FilterState};
pub use grouping::group_rows;
pub use sorter::RecordSorter;

pub(crate) use executor::{run_query, ExecEnv};
