//! Execution lifecycle hooks
//!
//! Synchronous callbacks bracketing the phases of one query execution:
//! the whole run, the master-join fetch batch, and the detail subquery
//! fan-out. All methods default to no-ops.

use uuid::Uuid;

use crate::executor::ExecuteError;

/// Identifies the execution and the (sub)query a phase belongs to.
#[derive(Debug, Clone)]
pub struct HookEvent {
    pub execution_id: Uuid,
    /// Dotted primary path of the query the phase is running for.
    pub path: String,
}

/// Phase callbacks for one execution.
pub trait ExecutionHooks: Send + Sync {
    /// Called once, before the root query starts.
    fn begin(&self, _event: &HookEvent) {}

    /// Called before the master-join fetch batch of a query level.
    fn before_master_sub_queries(&self, _event: &HookEvent) {}

    /// Called after the master-join fetch batch of a query level.
    fn after_master_sub_queries(&self, _event: &HookEvent) {}

    /// Called before the detail subquery fan-out of a query level.
    fn before_detail_sub_queries(&self, _event: &HookEvent) {}

    /// Called after the detail subquery fan-out of a query level.
    fn after_detail_sub_queries(&self, _event: &HookEvent) {}

    /// Called once, after the root query finishes, with the error if it
    /// failed.
    fn end(&self, _event: &HookEvent, _error: Option<&ExecuteError>) {}
}

/// The default hooks: every phase is a no-op.
pub struct NoopHooks;

impl ExecutionHooks for NoopHooks {}
