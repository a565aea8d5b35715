//! Resolver callback seam
//!
//! A resolver is the per-source fetch callback the engine drives. The
//! engine hands it a field list, pruned scope-local conditions, and the
//! sort/window clauses it is allowed to push down; the resolver reports
//! back, through the context's capability flags, which of those it
//! actually applied. Everything it did not apply, the engine compensates
//! for in-process.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use uuid::Uuid;

use crate::ast::{Condition, ParamMap, SortKey};
use crate::compiler::JoinDirection;
use crate::executor::ResolveError;
use crate::util::Record;

/// What a resolver applied out of the request it was handed.
///
/// All flags start false. A resolver that pushed the conditions into its
/// backing store sets `filtering`; likewise for `sorting`, `limit`, and
/// `offset`. Claiming `limit` or `offset` without also applying the
/// supplied conditions and sort keys yields wrong result windows; the
/// engine trusts these flags. A claim for a clause the request did not
/// carry (an empty window, a withheld condition list) is ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverCapabilities {
    pub filtering: bool,
    pub sorting: bool,
    pub limit: bool,
    pub offset: bool,
}

/// One fetch request against a data source.
#[derive(Debug)]
pub struct ResolverRequest<'a> {
    /// Field names to fetch, scope-local spellings.
    pub fields: &'a [String],
    /// Scope-local conditions, implicitly and-joined. Renderable via
    /// `conditions::render_and_list` for stores that take predicate
    /// strings.
    pub conditions: &'a [Condition],
    pub order_by: &'a [SortKey],
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Caller-supplied parameters, for rendering `Param` operands.
    pub params: &'a ParamMap,
}

/// Per-call context: where in the query tree this fetch sits.
#[derive(Debug, Clone)]
pub struct ResolverContext {
    pub execution_id: Uuid,
    /// True-cased source name being fetched.
    pub source: String,
    /// Dotted binding path within the query.
    pub path: String,
    /// Join direction when this fetch serves a relationship traversal.
    pub direction: Option<JoinDirection>,
    pub foreign_key: Option<String>,
    pub parent_source: Option<String>,
    /// The parent row a detail fan-out fetch belongs to.
    pub parent_record: Option<Record>,
    /// Free-form caller data supplied at execution entry, handed to
    /// every fetch of that execution unchanged.
    pub user_data: Option<Value>,
    /// Set by the resolver; see `ResolverCapabilities`.
    pub capabilities: ResolverCapabilities,
}

pub type ResolverFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<Record>, ResolveError>> + Send + 'a>>;

/// The per-source fetch callback.
pub trait QueryResolver: Send + Sync {
    fn query<'a>(&'a self, req: ResolverRequest<'a>, ctx: &'a mut ResolverContext)
        -> ResolverFuture<'a>;
}
