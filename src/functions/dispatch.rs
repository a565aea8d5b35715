//! Function dispatch decisions and operand-value coercion
//!
//! Each comparison node's operand-0 dispatch shape and its resolved,
//! type-coerced operand-1 value are computed once per execution and
//! memoized in side tables keyed by the node's stable id. Clones of a
//! condition tree carry fresh ids, so a cache never serves stale entries
//! from the tree the clone was derived from.

use std::collections::HashMap;

use serde_json::Value;

use crate::ast::{
    Atom, Comparison, ComparisonTarget, ComparisonValue, FunctionArg, FunctionCall, NodeId,
    ParamMap, ParamValue,
};
use crate::util::{get_path, Record};

use super::errors::{FunctionError, FunctionResult};
use super::registry::{FunctionKind, FunctionTable};

/// The five evaluator shapes an operand 0 can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchShape {
    /// Plain field reference.
    PlainField,
    /// Aggregate call over a group's records.
    AggregateCall,
    /// Scalar call in aggregate context (all field args are group fields).
    ScalarGrouped,
    /// Scalar call outside grouping, per record.
    ScalarRow,
    /// Immediate-scalar call, context-independent.
    Immediate,
}

/// A type-coerced operand-1 value ready for comparison.
///
/// Dates and datetimes are coerced to millisecond timestamps here, so the
/// comparison loop never re-parses them.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
    Timestamp(f64),
    List(Vec<ResolvedValue>),
}

impl ResolvedValue {
    pub fn from_atom(atom: &Atom) -> Self {
        match atom {
            Atom::Number(n) => ResolvedValue::Number(*n),
            Atom::Text(s) => ResolvedValue::Text(s.clone()),
            Atom::Bool(b) => ResolvedValue::Bool(*b),
            Atom::Null => ResolvedValue::Null,
            Atom::Date(d) => ResolvedValue::Timestamp(date_millis(d)),
            Atom::DateTime(dt) => ResolvedValue::Timestamp(dt.timestamp_millis() as f64),
        }
    }

    pub fn from_param(value: &ParamValue) -> Self {
        match value {
            ParamValue::Atom(a) => Self::from_atom(a),
            ParamValue::List(list) => {
                ResolvedValue::List(list.iter().map(Self::from_atom).collect())
            }
        }
    }
}

fn date_millis(d: &chrono::NaiveDate) -> f64 {
    d.and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc().timestamp_millis() as f64)
        .unwrap_or(0.0)
}

/// Converts an atomic literal to its record-value shape.
pub fn atom_to_value(atom: &Atom) -> Value {
    match atom {
        Atom::Number(n) => Value::from(*n),
        Atom::Text(s) => Value::String(s.clone()),
        Atom::Bool(b) => Value::Bool(*b),
        Atom::Null => Value::Null,
        Atom::Date(d) => Value::String(d.to_string()),
        Atom::DateTime(dt) => Value::String(dt.to_rfc3339()),
    }
}

/// Per-execution memoization of dispatch shapes and coerced values.
#[derive(Debug, Default)]
pub struct DispatchCache {
    shapes: HashMap<NodeId, DispatchShape>,
    values: HashMap<NodeId, ResolvedValue>,
}

impl DispatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies operand 0 of a comparison, memoized by node id.
    pub fn shape(
        &mut self,
        cmp: &Comparison,
        table: &FunctionTable,
        grouping: bool,
        group_fields: &[String],
    ) -> FunctionResult<DispatchShape> {
        if let Some(shape) = self.shapes.get(&cmp.node) {
            return Ok(*shape);
        }
        let shape = classify(&cmp.target, table, grouping, group_fields)?;
        self.shapes.insert(cmp.node, shape);
        Ok(shape)
    }

    /// Resolves and coerces operand 1 of a comparison, memoized by node id.
    ///
    /// Parameter references resolve against the caller-supplied map; an
    /// absent name is a lookup error. Subquery operands are materialized
    /// into in-lists before evaluation ever reaches this point, so they
    /// resolve as null here.
    pub fn value(&mut self, cmp: &Comparison, params: &ParamMap) -> FunctionResult<ResolvedValue> {
        if let Some(v) = self.values.get(&cmp.node) {
            return Ok(v.clone());
        }
        let resolved = match &cmp.value {
            ComparisonValue::Atom(a) => ResolvedValue::from_atom(a),
            ComparisonValue::List(list) => {
                ResolvedValue::List(list.iter().map(ResolvedValue::from_atom).collect())
            }
            ComparisonValue::Param(name) => {
                let value = params
                    .get(name)
                    .ok_or_else(|| FunctionError::ParameterNotFound(name.clone()))?;
                ResolvedValue::from_param(value)
            }
            ComparisonValue::SubQuery(_) | ComparisonValue::SubQueryRef(_) => ResolvedValue::Null,
        };
        self.values.insert(cmp.node, resolved.clone());
        Ok(resolved)
    }
}

fn classify(
    target: &ComparisonTarget,
    table: &FunctionTable,
    grouping: bool,
    group_fields: &[String],
) -> FunctionResult<DispatchShape> {
    let call = match target {
        ComparisonTarget::Field(path) => {
            // Under grouping only group-key fields have a per-group value.
            if grouping
                && !group_fields
                    .iter()
                    .any(|g| g.eq_ignore_ascii_case(path.field_name()))
            {
                return Err(FunctionError::AggregateNeeded(path.field_name().to_string()));
            }
            return Ok(DispatchShape::PlainField);
        }
        ComparisonTarget::Function(call) => call,
    };
    let def = table.resolve(&call.name)?;
    match def.kind {
        FunctionKind::Aggregate => {
            if !grouping {
                return Err(FunctionError::AggregateOutsideGrouping(call.name.clone()));
            }
            Ok(DispatchShape::AggregateCall)
        }
        FunctionKind::ImmediateScalar => {
            if call.field_args().next().is_some() {
                return Err(FunctionError::FieldInImmediate(call.name.clone()));
            }
            Ok(DispatchShape::Immediate)
        }
        FunctionKind::Scalar => {
            if !grouping {
                return Ok(DispatchShape::ScalarRow);
            }
            let all_grouped = call.field_args().all(|path| {
                group_fields
                    .iter()
                    .any(|g| g.eq_ignore_ascii_case(path.field_name()))
            });
            if all_grouped {
                Ok(DispatchShape::ScalarGrouped)
            } else {
                Err(FunctionError::AggregateNeeded(call.name.clone()))
            }
        }
    }
}

/// Evaluates a scalar call against one record.
pub fn eval_row_call(
    table: &FunctionTable,
    call: &FunctionCall,
    record: &Record,
) -> FunctionResult<Value> {
    let def = table.resolve(&call.name)?;
    let args: Vec<Value> = call
        .args
        .iter()
        .map(|arg| match arg {
            FunctionArg::Field(path) => get_path(record, &path.segments)
                .cloned()
                .unwrap_or(Value::Null),
            FunctionArg::Atom(a) => atom_to_value(a),
        })
        .collect();
    def.eval_row(&args)
}

/// Evaluates an immediate-scalar call, independent of any record.
pub fn eval_immediate_call(table: &FunctionTable, call: &FunctionCall) -> FunctionResult<Value> {
    let def = table.resolve(&call.name)?;
    let args: Vec<Value> = call
        .args
        .iter()
        .map(|arg| match arg {
            FunctionArg::Field(_) => Value::Null,
            FunctionArg::Atom(a) => atom_to_value(a),
        })
        .collect();
    def.eval_row(&args)
}

/// Evaluates an aggregate call over a group's records, building one
/// column of values per argument.
pub fn eval_group_call(
    table: &FunctionTable,
    call: &FunctionCall,
    rows: &[Record],
) -> FunctionResult<Value> {
    let def = table.resolve(&call.name)?;
    let columns: Vec<Vec<Value>> = call
        .args
        .iter()
        .map(|arg| {
            rows.iter()
                .map(|record| match arg {
                    FunctionArg::Field(path) => get_path(record, &path.segments)
                        .cloned()
                        .unwrap_or(Value::Null),
                    FunctionArg::Atom(a) => atom_to_value(a),
                })
                .collect()
        })
        .collect();
    def.eval_group(&columns, rows.len())
}
