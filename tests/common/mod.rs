//! Shared fixtures for the engine integration tests: in-memory table
//! resolvers and request capture.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::Value;

use fedquery::engine::{
    QueryResolver, ResolverCapabilities, ResolverContext, ResolverFuture, ResolverRequest,
};
use fedquery::executor::ResolveError;
use fedquery::util::Record;

/// One captured resolver request, enough to assert what the engine
/// offered for pushdown.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub path: String,
    pub fields: Vec<String>,
    pub condition_count: usize,
    pub order_key_count: usize,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

pub type RequestLog = Arc<Mutex<Vec<SeenRequest>>>;

pub fn record_request(log: &RequestLog, req: &ResolverRequest<'_>, ctx: &ResolverContext) {
    log.lock().unwrap().push(SeenRequest {
        path: ctx.path.clone(),
        fields: req.fields.to_vec(),
        condition_count: req.conditions.len(),
        order_key_count: req.order_by.len(),
        limit: req.limit,
        offset: req.offset,
    });
}

pub fn records(rows: Vec<Value>) -> Vec<Record> {
    rows.into_iter()
        .map(|v| match v {
            Value::Object(map) => map,
            other => panic!("fixture row must be an object, got {other}"),
        })
        .collect()
}

/// Returns everything it holds on every request and claims no
/// capabilities; the engine compensates in-process.
pub struct TableResolver {
    rows: Vec<Record>,
    pub log: RequestLog,
}

impl TableResolver {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            rows: records(rows),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl QueryResolver for TableResolver {
    fn query<'a>(
        &'a self,
        req: ResolverRequest<'a>,
        ctx: &'a mut ResolverContext,
    ) -> ResolverFuture<'a> {
        record_request(&self.log, &req, ctx);
        let rows = self.rows.clone();
        Box::pin(async move { Ok(rows) })
    }
}

/// Returns its rows verbatim while claiming the given capabilities, so
/// tests can observe the engine skipping its own compensation.
pub struct ClaimingResolver {
    rows: Vec<Record>,
    caps: ResolverCapabilities,
}

impl ClaimingResolver {
    pub fn new(rows: Vec<Value>, caps: ResolverCapabilities) -> Self {
        Self {
            rows: records(rows),
            caps,
        }
    }
}

impl QueryResolver for ClaimingResolver {
    fn query<'a>(
        &'a self,
        _req: ResolverRequest<'a>,
        ctx: &'a mut ResolverContext,
    ) -> ResolverFuture<'a> {
        ctx.capabilities = self.caps;
        let rows = self.rows.clone();
        Box::pin(async move { Ok(rows) })
    }
}

/// Always fails.
pub struct FailingResolver;

impl QueryResolver for FailingResolver {
    fn query<'a>(
        &'a self,
        _req: ResolverRequest<'a>,
        _ctx: &'a mut ResolverContext,
    ) -> ResolverFuture<'a> {
        Box::pin(async { Err(ResolveError::msg("backend down")) })
    }
}

/// Pulls the named column out of every result row, null for missing.
pub fn column(rows: &[Record], field: &str) -> Vec<Value> {
    rows.iter()
        .map(|r| r.get(field).cloned().unwrap_or(Value::Null))
        .collect()
}
