//! Condition evaluation for query execution
//!
//! In-process filtering is the source of truth; whatever a resolver
//! pushed down, every surviving row is re-checked here. Comparisons do
//! not coerce types except for date and datetime operands, which are
//! matched against millisecond timestamps.

use std::collections::HashMap;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;

use crate::ast::{
    Comparison, ComparisonOp, ComparisonTarget, Condition, FieldPath, FunctionCall, NodeId,
    ParamMap,
};
use crate::functions::{
    eval_group_call, eval_immediate_call, eval_row_call, DispatchCache, DispatchShape,
    FunctionError, FunctionTable, ResolvedValue,
};
use crate::util::{get_path, Record};

use super::errors::ExecuteResult;

/// Static inputs of one evaluation pass.
pub struct EvalScope<'a> {
    pub functions: &'a FunctionTable,
    pub params: &'a ParamMap,
    /// Whether aggregate context applies (having evaluation).
    pub grouping: bool,
    /// Primary-relative group field names.
    pub group_fields: &'a [String],
    /// Primary path segments stripped off qualified operand paths.
    pub base: &'a [String],
}

/// Per-execution mutable state: memoized dispatch decisions, coerced
/// operand values, and compiled like-patterns, all keyed by node id.
#[derive(Default)]
pub struct FilterState {
    pub cache: DispatchCache,
    patterns: HashMap<NodeId, Regex>,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }
}

enum Subject<'r> {
    Row(&'r Record),
    Group(&'r [Record]),
}

impl<'r> Subject<'r> {
    /// The representative record field lookups run against.
    fn record(&self) -> Option<&'r Record> {
        match self {
            Subject::Row(r) => Some(r),
            Subject::Group(rows) => rows.first(),
        }
    }
}

/// Evaluates condition lists against rows and groups
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// Checks one record against an and-list.
    pub fn matches_row(
        scope: &EvalScope<'_>,
        state: &mut FilterState,
        record: &Record,
        conds: &[Condition],
    ) -> ExecuteResult<bool> {
        let subject = Subject::Row(record);
        for cond in conds {
            if !Self::eval(scope, state, &subject, cond)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Checks one group against an and-list (having evaluation).
    pub fn matches_group(
        scope: &EvalScope<'_>,
        state: &mut FilterState,
        rows: &[Record],
        conds: &[Condition],
    ) -> ExecuteResult<bool> {
        let subject = Subject::Group(rows);
        for cond in conds {
            if !Self::eval(scope, state, &subject, cond)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn eval(
        scope: &EvalScope<'_>,
        state: &mut FilterState,
        subject: &Subject<'_>,
        cond: &Condition,
    ) -> ExecuteResult<bool> {
        match cond {
            Condition::And(children) => {
                for c in children {
                    if !Self::eval(scope, state, subject, c)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Or(children) => {
                for c in children {
                    if Self::eval(scope, state, subject, c)? {
                        return Ok(true);
                    }
                }
                Ok(children.is_empty())
            }
            Condition::Not(children) => {
                for c in children {
                    if !Self::eval(scope, state, subject, c)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::True => Ok(true),
            Condition::Comparison(cmp) => Self::eval_comparison(scope, state, subject, cmp),
        }
    }

    fn eval_comparison(
        scope: &EvalScope<'_>,
        state: &mut FilterState,
        subject: &Subject<'_>,
        cmp: &Comparison,
    ) -> ExecuteResult<bool> {
        let shape = state
            .cache
            .shape(cmp, scope.functions, scope.grouping, scope.group_fields)?;
        let lhs = Self::operand_0(scope, subject, cmp, shape)?;
        let rhs = state.cache.value(cmp, scope.params)?;
        Ok(Self::compare(state, cmp, &lhs, &rhs))
    }

    fn operand_0(
        scope: &EvalScope<'_>,
        subject: &Subject<'_>,
        cmp: &Comparison,
        shape: DispatchShape,
    ) -> ExecuteResult<Value> {
        let value = match (shape, &cmp.target) {
            (DispatchShape::PlainField, ComparisonTarget::Field(path)) => {
                let local = localize_path(path, scope.base);
                subject
                    .record()
                    .and_then(|r| get_path(r, &local.segments))
                    .cloned()
                    .unwrap_or(Value::Null)
            }
            (DispatchShape::AggregateCall, ComparisonTarget::Function(call)) => match subject {
                Subject::Group(rows) => {
                    eval_group_call(scope.functions, &localize_call(call, scope.base), rows)?
                }
                Subject::Row(_) => {
                    return Err(
                        FunctionError::AggregateOutsideGrouping(call.name.clone()).into(),
                    )
                }
            },
            (
                DispatchShape::ScalarRow | DispatchShape::ScalarGrouped,
                ComparisonTarget::Function(call),
            ) => match subject.record() {
                Some(record) => {
                    eval_row_call(scope.functions, &localize_call(call, scope.base), record)?
                }
                None => Value::Null,
            },
            (DispatchShape::Immediate, ComparisonTarget::Function(call)) => {
                eval_immediate_call(scope.functions, call)?
            }
            // Shape and target are classified together; other pairings
            // cannot occur.
            _ => Value::Null,
        };
        Ok(value)
    }

    fn compare(state: &mut FilterState, cmp: &Comparison, lhs: &Value, rhs: &ResolvedValue) -> bool {
        match cmp.op {
            ComparisonOp::Eq => eq_value(lhs, rhs),
            ComparisonOp::Ne => !eq_value(lhs, rhs),
            ComparisonOp::Lt | ComparisonOp::Le | ComparisonOp::Gt | ComparisonOp::Ge => {
                ordered_match(cmp.op, lhs, rhs)
            }
            ComparisonOp::Like => like_match(state, cmp.node, lhs, rhs),
            ComparisonOp::NotLike => match lhs {
                Value::String(_) => !like_match(state, cmp.node, lhs, rhs),
                _ => false,
            },
            ComparisonOp::In => in_match(lhs, rhs),
            ComparisonOp::NotIn => !in_match(lhs, rhs),
            ComparisonOp::Includes => includes_match(lhs, rhs),
            ComparisonOp::Excludes => match lhs {
                Value::String(_) => !includes_match(lhs, rhs),
                _ => false,
            },
        }
    }
}

fn localize_path(path: &FieldPath, base: &[String]) -> FieldPath {
    path.strip_prefix(base)
        .filter(|p| !p.segments.is_empty())
        .unwrap_or_else(|| path.clone())
}

fn localize_call(call: &FunctionCall, base: &[String]) -> FunctionCall {
    let mut call = call.clone();
    for arg in call.field_args_mut() {
        *arg = localize_path(arg, base);
    }
    call
}

/// Equality without type coercion; `= null` matches null and missing
/// fields alike. Date operands compare as millisecond timestamps.
fn eq_value(lhs: &Value, rhs: &ResolvedValue) -> bool {
    match rhs {
        ResolvedValue::Null => lhs.is_null(),
        ResolvedValue::Number(n) => lhs.as_f64() == Some(*n),
        ResolvedValue::Text(s) => lhs.as_str() == Some(s.as_str()),
        ResolvedValue::Bool(b) => lhs.as_bool() == Some(*b),
        ResolvedValue::Timestamp(ms) => value_millis(lhs) == Some(*ms),
        ResolvedValue::List(_) => false,
    }
}

fn ordered_match(op: ComparisonOp, lhs: &Value, rhs: &ResolvedValue) -> bool {
    let ordering = match rhs {
        ResolvedValue::Number(n) => lhs.as_f64().and_then(|l| l.partial_cmp(n)),
        ResolvedValue::Text(s) => lhs.as_str().map(|l| l.cmp(s.as_str())),
        ResolvedValue::Timestamp(ms) => value_millis(lhs).and_then(|l| l.partial_cmp(ms)),
        _ => None,
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        ComparisonOp::Lt => ordering.is_lt(),
        ComparisonOp::Le => ordering.is_le(),
        ComparisonOp::Gt => ordering.is_gt(),
        ComparisonOp::Ge => ordering.is_ge(),
        _ => false,
    }
}

/// Millisecond timestamp of a record value: numbers pass through,
/// strings parse as RFC 3339 datetimes or plain dates.
fn value_millis(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp_millis() as f64);
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|t| t.and_utc().timestamp_millis() as f64)
        }
        _ => None,
    }
}

/// Case-insensitive like-pattern match: `%` matches any run, `_` one
/// character. Compiled patterns are memoized per comparison node.
fn like_match(state: &mut FilterState, node: NodeId, lhs: &Value, rhs: &ResolvedValue) -> bool {
    let (Value::String(text), ResolvedValue::Text(pattern)) = (lhs, rhs) else {
        return false;
    };
    if let Some(re) = state.patterns.get(&node) {
        return re.is_match(text);
    }
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push_str("(?i)^");
    for c in pattern.chars() {
        match c {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            c => source.push_str(&regex::escape(&c.to_string())),
        }
    }
    source.push('$');
    match Regex::new(&source) {
        Ok(re) => {
            let matched = re.is_match(text);
            state.patterns.insert(node, re);
            matched
        }
        Err(_) => false,
    }
}

/// Membership against a value list; a null haystack element never
/// matches, not even a null operand. A scalar operand behaves as a
/// one-element list.
fn in_match(lhs: &Value, rhs: &ResolvedValue) -> bool {
    let one;
    let haystack: &[ResolvedValue] = match rhs {
        ResolvedValue::List(list) => list,
        other => {
            one = [other.clone()];
            &one
        }
    };
    haystack
        .iter()
        .any(|v| !matches!(v, ResolvedValue::Null) && eq_value(lhs, v))
}

/// Multi-value string membership: the record value is a `;`-separated
/// list of entries.
fn includes_match(lhs: &Value, rhs: &ResolvedValue) -> bool {
    let Value::String(text) = lhs else {
        return false;
    };
    let one;
    let wanted: &[ResolvedValue] = match rhs {
        ResolvedValue::List(list) => list,
        other => {
            one = [other.clone()];
            &one
        }
    };
    let parts: Vec<&str> = text.split(';').map(str::trim).collect();
    wanted.iter().any(|v| match v {
        ResolvedValue::Text(s) => parts.contains(&s.as_str()),
        _ => false,
    })
}
