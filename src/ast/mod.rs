//! Query AST structures
//!
//! Defines the parsed query representation the engine consumes. A textual
//! parser producing these shapes is an external concern; the engine only
//! normalizes and executes them.

mod condition;

pub use condition::{
    Atom, Comparison, ComparisonOp, ComparisonTarget, ComparisonValue, Condition, NodeId,
    ParamMap, ParamValue,
};

/// A dotted field path, one segment per element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    pub segments: Vec<String>,
}

impl FieldPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Parses a dotted path string ("Contact.Account.Name").
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path.split('.').map(|s| s.to_string()).collect(),
        }
    }

    /// Joins the segments back into a dotted string.
    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }

    /// The final segment: the local field name.
    pub fn field_name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// The path without its final segment, dotted.
    pub fn parent_dotted(&self) -> String {
        self.segments[..self.segments.len().saturating_sub(1)].join(".")
    }

    /// Checks whether this path starts with `prefix` segments,
    /// case-insensitively.
    pub fn starts_with(&self, prefix: &[String]) -> bool {
        self.segments.len() >= prefix.len()
            && self
                .segments
                .iter()
                .zip(prefix.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// Strips `prefix` segments, returning the local remainder.
    pub fn strip_prefix(&self, prefix: &[String]) -> Option<FieldPath> {
        if !self.starts_with(prefix) {
            return None;
        }
        Some(FieldPath::new(self.segments[prefix.len()..].to_vec()))
    }
}

/// A function call appearing in a select list or condition operand.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<FunctionArg>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, args: Vec<FunctionArg>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Iterates the field-reference arguments.
    pub fn field_args(&self) -> impl Iterator<Item = &FieldPath> {
        self.args.iter().filter_map(|a| match a {
            FunctionArg::Field(p) => Some(p),
            FunctionArg::Atom(_) => None,
        })
    }

    /// Mutable access to the field-reference arguments.
    pub fn field_args_mut(&mut self) -> impl Iterator<Item = &mut FieldPath> {
        self.args.iter_mut().filter_map(|a| match a {
            FunctionArg::Field(p) => Some(p),
            FunctionArg::Atom(_) => None,
        })
    }
}

/// A function argument: a field reference or a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArg {
    Field(FieldPath),
    Atom(Atom),
}

/// One entry of a select list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Field {
        path: FieldPath,
        alias: Option<String>,
    },
    Function {
        call: FunctionCall,
        alias: Option<String>,
    },
    SubQuery(Query),
}

impl SelectItem {
    pub fn field(path: &str) -> Self {
        SelectItem::Field {
            path: FieldPath::parse(path),
            alias: None,
        }
    }

    pub fn field_as(path: &str, alias: &str) -> Self {
        SelectItem::Field {
            path: FieldPath::parse(path),
            alias: Some(alias.to_string()),
        }
    }

    pub fn function(call: FunctionCall) -> Self {
        SelectItem::Function { call, alias: None }
    }

    pub fn function_as(call: FunctionCall, alias: &str) -> Self {
        SelectItem::Function {
            call,
            alias: Some(alias.to_string()),
        }
    }
}

/// One entry of the from list; index 0 is the primary binding.
#[derive(Debug, Clone, PartialEq)]
pub struct FromEntry {
    /// Dotted graph path, possibly alias-prefixed before normalization.
    pub path: String,
    pub alias: Option<String>,
}

impl FromEntry {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            alias: None,
        }
    }

    pub fn aliased(path: &str, alias: &str) -> Self {
        Self {
            path: path.to_string(),
            alias: Some(alias.to_string()),
        }
    }
}

/// Sort direction for one order-by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Placement of null values relative to non-null ones.
///
/// `First` (the default) orders the non-null side of a pair ahead of
/// the null side; `Last` reverses that. A `desc` key inverts the
/// resulting sign along with the rest of the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

/// One order-by key.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub path: FieldPath,
    pub direction: SortDirection,
    pub nulls: NullsOrder,
}

impl SortKey {
    pub fn asc(path: &str) -> Self {
        Self {
            path: FieldPath::parse(path),
            direction: SortDirection::Asc,
            nulls: NullsOrder::First,
        }
    }

    pub fn desc(path: &str) -> Self {
        Self {
            path: FieldPath::parse(path),
            direction: SortDirection::Desc,
            nulls: NullsOrder::First,
        }
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls = NullsOrder::Last;
        self
    }
}

/// An already-parsed relational query.
///
/// Produced externally, normalized once by the compiler, then reusable
/// across executions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub select: Vec<SelectItem>,
    pub from: Vec<FromEntry>,
    pub where_clause: Option<Condition>,
    pub having_clause: Option<Condition>,
    pub group_by: Vec<String>,
    pub order_by: Vec<SortKey>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Query {
    pub fn from_source(path: &str) -> Self {
        Self {
            from: vec![FromEntry::new(path)],
            ..Default::default()
        }
    }

    pub fn select(mut self, item: SelectItem) -> Self {
        self.select.push(item);
        self
    }

    pub fn join(mut self, entry: FromEntry) -> Self {
        self.from.push(entry);
        self
    }

    pub fn filter(mut self, cond: Condition) -> Self {
        self.where_clause = Some(cond);
        self
    }

    pub fn having(mut self, cond: Condition) -> Self {
        self.having_clause = Some(cond);
        self
    }

    pub fn group(mut self, field: &str) -> Self {
        self.group_by.push(field.to_string());
        self
    }

    pub fn order(mut self, key: SortKey) -> Self {
        self.order_by.push(key);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }
}
