//! Condition tree algebra
//!
//! Flattening, resolver-scoped pruning, and index-field extraction. All
//! operations leave the input tree untouched and produce new trees; node
//! ids are preserved, since a pruned copy evaluates identically to its
//! source within one execution.

use std::collections::HashSet;

use crate::ast::{
    Comparison, ComparisonTarget, ComparisonValue, Condition, ParamMap, ParamValue,
};

use super::errors::{ConditionError, ConditionResult};

/// Logical connective kind, used to drive chain merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalKind {
    And,
    Or,
    Not,
}

/// Merges same-operator chains depth-first, producing a list.
///
/// A child with a different logical operator is recursively flattened and
/// re-wrapped; a merged chain of one element unwraps to that element;
/// comparison and `True` nodes pass through unchanged. The top level is
/// implicitly an `and` of the returned list.
pub fn flatten(parent: LogicalKind, cond: &Condition) -> Vec<Condition> {
    match cond {
        Condition::And(children) if parent == LogicalKind::And => children
            .iter()
            .flat_map(|c| flatten(LogicalKind::And, c))
            .collect(),
        Condition::Or(children) if parent == LogicalKind::Or => children
            .iter()
            .flat_map(|c| flatten(LogicalKind::Or, c))
            .collect(),
        Condition::And(children) => {
            let inner: Vec<Condition> = children
                .iter()
                .flat_map(|c| flatten(LogicalKind::And, c))
                .collect();
            vec![rewrap(LogicalKind::And, inner)]
        }
        Condition::Or(children) => {
            let inner: Vec<Condition> = children
                .iter()
                .flat_map(|c| flatten(LogicalKind::Or, c))
                .collect();
            vec![rewrap(LogicalKind::Or, inner)]
        }
        Condition::Not(children) => {
            let inner: Vec<Condition> = children
                .iter()
                .flat_map(|c| flatten(LogicalKind::Not, c))
                .collect();
            vec![Condition::Not(inner)]
        }
        other => vec![other.clone()],
    }
}

fn rewrap(kind: LogicalKind, mut children: Vec<Condition>) -> Condition {
    if children.len() == 1 {
        return children.remove(0);
    }
    match kind {
        LogicalKind::And => Condition::And(children),
        LogicalKind::Or => Condition::Or(children),
        LogicalKind::Not => Condition::Not(children),
    }
}

/// Flattens a condition tree into a top-level `and` list.
pub fn flatten_to_and_list(cond: &Condition) -> Vec<Condition> {
    flatten(LogicalKind::And, cond)
}

/// Scopes a condition tree to one data-source binding.
///
/// Comparison operand-0 field names (and every function-argument field)
/// must be prefixed by `source_path`; the prefix is stripped. A mismatch
/// collapses the comparison to `True`, and logical nodes drop children
/// that reduce to `True` (an emptied logical becomes `True` itself).
pub fn prune_to_source(source_path: &str, cond: &Condition) -> Condition {
    let prefix: Vec<String> = source_path.split('.').map(|s| s.to_string()).collect();
    prune(&prefix, cond)
}

fn prune(prefix: &[String], cond: &Condition) -> Condition {
    match cond {
        Condition::And(children) => {
            let kept = prune_children(prefix, children);
            if kept.is_empty() {
                Condition::True
            } else {
                Condition::And(kept)
            }
        }
        Condition::Or(children) => {
            let kept = prune_children(prefix, children);
            if kept.is_empty() {
                Condition::True
            } else {
                Condition::Or(kept)
            }
        }
        Condition::Not(children) => {
            let kept = prune_children(prefix, children);
            if kept.is_empty() {
                Condition::True
            } else {
                Condition::Not(kept)
            }
        }
        Condition::True => Condition::True,
        Condition::Comparison(cmp) => prune_comparison(prefix, cmp),
    }
}

fn prune_children(prefix: &[String], children: &[Condition]) -> Vec<Condition> {
    children
        .iter()
        .map(|c| prune(prefix, c))
        .filter(|c| !c.is_true())
        .collect()
}

fn prune_comparison(prefix: &[String], cmp: &Comparison) -> Condition {
    match &cmp.target {
        ComparisonTarget::Field(path) => {
            match path.strip_prefix(prefix) {
                Some(local) if !local.segments.is_empty() => {
                    let mut pruned = cmp.clone();
                    pruned.target = ComparisonTarget::Field(local);
                    Condition::Comparison(pruned)
                }
                _ => Condition::True,
            }
        }
        ComparisonTarget::Function(call) => {
            let mut localized = call.clone();
            for path in localized.field_args_mut() {
                match path.strip_prefix(prefix) {
                    Some(local) if !local.segments.is_empty() => *path = local,
                    _ => return Condition::True,
                }
            }
            let mut pruned = cmp.clone();
            pruned.target = ComparisonTarget::Function(localized);
            Condition::Comparison(pruned)
        }
    }
}

/// Extracts the subset of a condition tree eligible for index pushdown.
///
/// Function-call operands and subquery values are never eligible and
/// collapse to `True`. A parameter reference occurring as the entire
/// operand 1 is resolved to its concrete value first (an absent name is a
/// lookup error); a scalar resolving into a list-taking operator becomes
/// a one-element list. Only comparisons whose operand-0 field name is in
/// the lowercased allow-list survive. Applying the extraction twice is
/// idempotent.
pub fn extract_index_eligible(
    params: &ParamMap,
    cond: &Condition,
    allowed: &HashSet<String>,
) -> ConditionResult<Condition> {
    match cond {
        Condition::And(children) => {
            let kept = extract_children(params, children, allowed)?;
            Ok(rewrap_extracted(LogicalKind::And, kept))
        }
        Condition::Or(children) => {
            let kept = extract_children(params, children, allowed)?;
            Ok(rewrap_extracted(LogicalKind::Or, kept))
        }
        Condition::Not(children) => {
            let kept = extract_children(params, children, allowed)?;
            if kept.is_empty() {
                Ok(Condition::True)
            } else {
                Ok(Condition::Not(kept))
            }
        }
        Condition::True => Ok(Condition::True),
        Condition::Comparison(cmp) => extract_comparison(params, cmp, allowed),
    }
}

fn extract_children(
    params: &ParamMap,
    children: &[Condition],
    allowed: &HashSet<String>,
) -> ConditionResult<Vec<Condition>> {
    let mut kept = Vec::with_capacity(children.len());
    for child in children {
        let extracted = extract_index_eligible(params, child, allowed)?;
        if !extracted.is_true() {
            kept.push(extracted);
        }
    }
    Ok(kept)
}

fn rewrap_extracted(kind: LogicalKind, mut kept: Vec<Condition>) -> Condition {
    match kept.len() {
        0 => Condition::True,
        1 => kept.remove(0),
        _ => match kind {
            LogicalKind::And => Condition::And(kept),
            LogicalKind::Or => Condition::Or(kept),
            LogicalKind::Not => Condition::Not(kept),
        },
    }
}

fn extract_comparison(
    params: &ParamMap,
    cmp: &Comparison,
    allowed: &HashSet<String>,
) -> ConditionResult<Condition> {
    let field = match &cmp.target {
        ComparisonTarget::Field(path) => path,
        // Function calls are never index-eligible.
        ComparisonTarget::Function(_) => return Ok(Condition::True),
    };
    if !allowed.contains(&field.dotted().to_ascii_lowercase()) {
        return Ok(Condition::True);
    }
    let value = match &cmp.value {
        ComparisonValue::Param(name) => {
            let resolved = params
                .get(name)
                .ok_or_else(|| ConditionError::ParameterNotFound(name.clone()))?;
            match resolved {
                ParamValue::Atom(a) if cmp.op.takes_list() => {
                    ComparisonValue::List(vec![a.clone()])
                }
                ParamValue::Atom(a) => ComparisonValue::Atom(a.clone()),
                ParamValue::List(list) => ComparisonValue::List(list.clone()),
            }
        }
        ComparisonValue::SubQuery(_) | ComparisonValue::SubQueryRef(_) => {
            return Ok(Condition::True)
        }
        other => other.clone(),
    };
    let mut extracted = cmp.clone();
    extracted.value = value;
    Ok(Condition::Comparison(extracted))
}
