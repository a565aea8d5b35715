//! # Function Registry
//!
//! Holds the three function kinds the engine can dispatch:
//! - scalar: evaluated per record, arguments may reference record fields
//! - immediate-scalar: record-independent, arguments must be literals
//! - aggregate: evaluated over the full set of a group's records

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::errors::{FunctionError, FunctionResult};

/// Function kind, deciding how arguments are supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Scalar,
    ImmediateScalar,
    Aggregate,
}

impl FunctionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Scalar => "scalar",
            FunctionKind::ImmediateScalar => "immediate-scalar",
            FunctionKind::Aggregate => "aggregate",
        }
    }
}

/// Per-record callback: receives the resolved argument values.
pub type RowFn = Arc<dyn Fn(&[Value]) -> FunctionResult<Value> + Send + Sync>;

/// Aggregate callback: receives one column of values per argument plus
/// the group size (for zero-argument aggregates such as `count()`).
pub type GroupFn = Arc<dyn Fn(&[Vec<Value>], usize) -> FunctionResult<Value> + Send + Sync>;

/// The bound callback of a registered function.
#[derive(Clone)]
pub enum FunctionBody {
    Row(RowFn),
    Group(GroupFn),
}

/// A registered function.
#[derive(Clone)]
pub struct FunctionDef {
    pub name: String,
    pub kind: FunctionKind,
    body: FunctionBody,
}

impl FunctionDef {
    /// Invokes a scalar or immediate-scalar body.
    pub fn eval_row(&self, args: &[Value]) -> FunctionResult<Value> {
        match &self.body {
            FunctionBody::Row(f) => f(args),
            FunctionBody::Group(_) => Err(FunctionError::Evaluation(
                self.name.clone(),
                "aggregate body invoked with row arguments".into(),
            )),
        }
    }

    /// Invokes an aggregate body with per-argument value columns.
    pub fn eval_group(&self, columns: &[Vec<Value>], rows: usize) -> FunctionResult<Value> {
        match &self.body {
            FunctionBody::Group(f) => f(columns, rows),
            FunctionBody::Row(_) => Err(FunctionError::Evaluation(
                self.name.clone(),
                "row body invoked with group arguments".into(),
            )),
        }
    }
}

impl std::fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Registry of callable functions, matched case-insensitively by name.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    map: HashMap<String, FunctionDef>,
}

impl FunctionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table pre-loaded with the builtin functions.
    pub fn with_builtins() -> Self {
        let mut table = Self::new();
        table.register_builtins();
        table
    }

    /// Registers a scalar function.
    pub fn scalar(
        &mut self,
        name: &str,
        f: impl Fn(&[Value]) -> FunctionResult<Value> + Send + Sync + 'static,
    ) -> FunctionResult<()> {
        self.insert(name, FunctionKind::Scalar, FunctionBody::Row(Arc::new(f)))
    }

    /// Registers an immediate-scalar function.
    pub fn immediate(
        &mut self,
        name: &str,
        f: impl Fn(&[Value]) -> FunctionResult<Value> + Send + Sync + 'static,
    ) -> FunctionResult<()> {
        self.insert(
            name,
            FunctionKind::ImmediateScalar,
            FunctionBody::Row(Arc::new(f)),
        )
    }

    /// Registers an aggregate function.
    pub fn aggregate(
        &mut self,
        name: &str,
        f: impl Fn(&[Vec<Value>], usize) -> FunctionResult<Value> + Send + Sync + 'static,
    ) -> FunctionResult<()> {
        self.insert(
            name,
            FunctionKind::Aggregate,
            FunctionBody::Group(Arc::new(f)),
        )
    }

    fn insert(&mut self, name: &str, kind: FunctionKind, body: FunctionBody) -> FunctionResult<()> {
        let key = name.to_ascii_lowercase();
        if self.map.contains_key(&key) {
            return Err(FunctionError::AlreadyExists(name.to_string()));
        }
        self.map.insert(
            key,
            FunctionDef {
                name: name.to_string(),
                kind,
                body,
            },
        );
        Ok(())
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.map.get(&name.to_ascii_lowercase())
    }

    /// Lookup that raises `NotFound`.
    pub fn resolve(&self, name: &str) -> FunctionResult<&FunctionDef> {
        self.get(name)
            .ok_or_else(|| FunctionError::NotFound(name.to_string()))
    }

    fn register_builtins(&mut self) {
        // Registration of distinct builtin names cannot collide.
        let _ = self.aggregate("count", |columns, rows| {
            Ok(match columns.first() {
                None => Value::from(rows as u64),
                Some(col) => Value::from(col.iter().filter(|v| !v.is_null()).count() as u64),
            })
        });
        let _ = self.aggregate("count_distinct", |columns, _| {
            let col = columns.first().map(Vec::as_slice).unwrap_or(&[]);
            let mut seen: Vec<&Value> = Vec::new();
            for v in col.iter().filter(|v| !v.is_null()) {
                if !seen.contains(&v) {
                    seen.push(v);
                }
            }
            Ok(Value::from(seen.len() as u64))
        });
        let _ = self.aggregate("sum", |columns, _| {
            let col = columns.first().map(Vec::as_slice).unwrap_or(&[]);
            let total: f64 = col.iter().filter_map(Value::as_f64).sum();
            Ok(Value::from(total))
        });
        let _ = self.aggregate("avg", |columns, _| {
            let col = columns.first().map(Vec::as_slice).unwrap_or(&[]);
            let nums: Vec<f64> = col.iter().filter_map(Value::as_f64).collect();
            if nums.is_empty() {
                return Ok(Value::Null);
            }
            Ok(Value::from(nums.iter().sum::<f64>() / nums.len() as f64))
        });
        let _ = self.aggregate("min", |columns, _| Ok(fold_extreme(columns, false)));
        let _ = self.aggregate("max", |columns, _| Ok(fold_extreme(columns, true)));
        let _ = self.scalar("concat", |args| {
            let mut out = String::new();
            for arg in args {
                match arg {
                    Value::Null => {}
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
            }
            Ok(Value::String(out))
        });
        let _ = self.immediate("now", |_| Ok(Value::String(Utc::now().to_rfc3339())));
        let _ = self.immediate("today", |_| {
            Ok(Value::String(Utc::now().date_naive().to_string()))
        });
    }
}

/// Min/max over a mixed column: numbers compare numerically, strings
/// lexicographically, other shapes are skipped.
fn fold_extreme(columns: &[Vec<Value>], want_max: bool) -> Value {
    let col = columns.first().map(Vec::as_slice).unwrap_or(&[]);
    let mut best: Option<&Value> = None;
    for v in col {
        let better = match (best, v) {
            (_, Value::Null) => false,
            (None, _) => true,
            (Some(Value::Number(b)), Value::Number(n)) => {
                let (b, n) = (b.as_f64().unwrap_or(0.0), n.as_f64().unwrap_or(0.0));
                if want_max {
                    n > b
                } else {
                    n < b
                }
            }
            (Some(Value::String(b)), Value::String(s)) => {
                if want_max {
                    s > b
                } else {
                    s < b
                }
            }
            _ => false,
        };
        if better {
            best = Some(v);
        }
    }
    best.cloned().unwrap_or(Value::Null)
}
