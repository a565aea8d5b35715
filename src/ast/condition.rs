//! Condition tree nodes
//!
//! A condition is either a logical connective over child conditions or a
//! comparison between a field/function operand and a value operand. The
//! shapes here are the wire contract any external parser or resolver
//! integration produces and consumes.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};

use super::{FieldPath, FunctionCall, Query};

/// Stable per-comparison index assigned during compilation.
///
/// Dispatch decisions and coerced operand values are memoized in side
/// tables keyed by this id. Clones of a condition tree receive fresh ids
/// so memoized state is never shared between a tree and its clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeId(pub u32);

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    In,
    NotIn,
    Includes,
    Excludes,
}

impl ComparisonOp {
    /// Operator token used for dialect rendering.
    pub fn op_name(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Like => "like",
            ComparisonOp::NotLike => "not_like",
            ComparisonOp::In => "in",
            ComparisonOp::NotIn => "not_in",
            ComparisonOp::Includes => "includes",
            ComparisonOp::Excludes => "excludes",
        }
    }

    /// Operators whose value operand is a list.
    pub fn takes_list(&self) -> bool {
        matches!(
            self,
            ComparisonOp::In | ComparisonOp::NotIn | ComparisonOp::Includes | ComparisonOp::Excludes
        )
    }
}

/// An atomic literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl Atom {
    pub fn text(s: &str) -> Self {
        Atom::Text(s.to_string())
    }
}

/// A caller-supplied parameter value: an atom or an array of atoms.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Atom(Atom),
    List(Vec<Atom>),
}

/// Name-keyed parameter map supplied per execution.
pub type ParamMap = HashMap<String, ParamValue>;

/// Operand 0 of a comparison: a field reference or a function call.
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonTarget {
    Field(FieldPath),
    Function(FunctionCall),
}

/// Operand 1 of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonValue {
    Atom(Atom),
    List(Vec<Atom>),
    /// Resolved at execution time against the parameter map.
    Param(String),
    /// Nested subquery (where clauses only); rewritten by the compiler.
    SubQuery(Box<Query>),
    /// Compiled reference into the prepared query's subquery list,
    /// materialized into an in-list at execution time.
    SubQueryRef(usize),
}

/// A comparison node: exactly two operands.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub node: NodeId,
    pub op: ComparisonOp,
    pub target: ComparisonTarget,
    pub value: ComparisonValue,
}

/// A condition tree node.
///
/// Invariants after flattening: no `And` directly under `And`, no `Or`
/// directly under `Or`; `Not` holds exactly one operand; zero-operand
/// logicals and `True` nodes are removed by pruning.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Vec<Condition>),
    /// The tautological node: vacuously true, produced by pruning.
    True,
    Comparison(Comparison),
}

impl Condition {
    pub fn cmp(op: ComparisonOp, target: ComparisonTarget, value: ComparisonValue) -> Self {
        Condition::Comparison(Comparison {
            node: NodeId::default(),
            op,
            target,
            value,
        })
    }

    /// Field-vs-atom comparison shorthand.
    pub fn field_cmp(field: &str, op: ComparisonOp, value: Atom) -> Self {
        Self::cmp(
            op,
            ComparisonTarget::Field(FieldPath::parse(field)),
            ComparisonValue::Atom(value),
        )
    }

    /// Field-vs-list comparison shorthand (`in`, `not_in`, ...).
    pub fn field_in(field: &str, op: ComparisonOp, values: Vec<Atom>) -> Self {
        Self::cmp(
            op,
            ComparisonTarget::Field(FieldPath::parse(field)),
            ComparisonValue::List(values),
        )
    }

    pub fn and(conds: Vec<Condition>) -> Self {
        Condition::And(conds)
    }

    pub fn or(conds: Vec<Condition>) -> Self {
        Condition::Or(conds)
    }

    pub fn not(cond: Condition) -> Self {
        Condition::Not(vec![cond])
    }

    /// Whether this node is the tautological `True`.
    pub fn is_true(&self) -> bool {
        matches!(self, Condition::True)
    }

    /// Re-assigns fresh node ids over the whole tree, depth-first.
    ///
    /// Called on execution-owned clones so memoized dispatch state from
    /// the compiled template never leaks into the clone.
    pub fn renumber(&mut self, next: &mut dyn FnMut() -> NodeId) {
        match self {
            Condition::And(cs) | Condition::Or(cs) | Condition::Not(cs) => {
                for c in cs {
                    c.renumber(next);
                }
            }
            Condition::True => {}
            Condition::Comparison(cmp) => cmp.node = next(),
        }
    }

    /// Visits every comparison node, depth-first.
    pub fn visit_comparisons<'a>(&'a self, f: &mut dyn FnMut(&'a Comparison)) {
        match self {
            Condition::And(cs) | Condition::Or(cs) | Condition::Not(cs) => {
                for c in cs {
                    c.visit_comparisons(f);
                }
            }
            Condition::True => {}
            Condition::Comparison(cmp) => f(cmp),
        }
    }

    /// Mutable depth-first visit of every comparison node.
    pub fn visit_comparisons_mut(&mut self, f: &mut dyn FnMut(&mut Comparison)) {
        match self {
            Condition::And(cs) | Condition::Or(cs) | Condition::Not(cs) => {
                for c in cs {
                    c.visit_comparisons_mut(f);
                }
            }
            Condition::True => {}
            Condition::Comparison(cmp) => f(cmp),
        }
    }
}
