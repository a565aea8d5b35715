//! Dialect-specific predicate rendering
//!
//! Turns a condition tree into a predicate string a resolver can push
//! into its backing store. This path feeds an optional optimization, not
//! correctness-critical filtering (the in-process evaluator is the source
//! of truth), so unsupported operand shapes degrade to an always-true
//! fragment instead of raising.

use crate::ast::{Atom, Comparison, ComparisonOp, ComparisonTarget, ComparisonValue, Condition,
    ParamMap, ParamValue};

use super::errors::{ConditionError, ConditionResult};

/// Escaping and naming hooks a backing store supplies.
pub trait Dialect {
    /// Escapes the inside of a single-quoted string literal.
    fn escape_string(&self, s: &str) -> String;

    /// Maps a field name to its rendered spelling.
    fn field_name(&self, name: &str) -> String;
}

/// Identity dialect: no escaping, names pass through.
pub struct RawDialect;

impl Dialect for RawDialect {
    fn escape_string(&self, s: &str) -> String {
        s.to_string()
    }

    fn field_name(&self, name: &str) -> String {
        name.to_string()
    }
}

const ALWAYS_TRUE: &str = "(1=1)";

/// Renders one condition node.
pub fn render_condition(
    cond: &Condition,
    dialect: &dyn Dialect,
    params: &ParamMap,
) -> ConditionResult<String> {
    match cond {
        Condition::And(children) => render_connective("and", children, dialect, params),
        Condition::Or(children) => render_connective("or", children, dialect, params),
        Condition::Not(children) => {
            let inner = match children.first() {
                Some(c) => render_condition(c, dialect, params)?,
                None => ALWAYS_TRUE.to_string(),
            };
            Ok(format!("(not {})", inner))
        }
        Condition::True => Ok(ALWAYS_TRUE.to_string()),
        Condition::Comparison(cmp) => render_comparison(cmp, dialect, params),
    }
}

/// Renders an and-list the way resolvers consume it: one `and`-joined
/// predicate set.
pub fn render_and_list(
    conds: &[Condition],
    dialect: &dyn Dialect,
    params: &ParamMap,
) -> ConditionResult<String> {
    let rendered: Vec<String> = conds
        .iter()
        .map(|c| render_condition(c, dialect, params))
        .collect::<ConditionResult<_>>()?;
    Ok(rendered.join(" and "))
}

fn render_connective(
    op: &str,
    children: &[Condition],
    dialect: &dyn Dialect,
    params: &ParamMap,
) -> ConditionResult<String> {
    if children.is_empty() {
        return Ok(ALWAYS_TRUE.to_string());
    }
    let parts: Vec<String> = children
        .iter()
        .map(|c| render_condition(c, dialect, params))
        .collect::<ConditionResult<_>>()?;
    Ok(format!("({})", parts.join(&format!(" {} ", op))))
}

fn render_comparison(
    cmp: &Comparison,
    dialect: &dyn Dialect,
    params: &ParamMap,
) -> ConditionResult<String> {
    // Multi-value-string membership has no direct predicate translation.
    if matches!(cmp.op, ComparisonOp::Includes | ComparisonOp::Excludes) {
        return Ok(ALWAYS_TRUE.to_string());
    }
    let field = match &cmp.target {
        ComparisonTarget::Field(path) => dialect.field_name(&path.dotted()),
        // Function-call operands degrade permissively.
        ComparisonTarget::Function(_) => return Ok(ALWAYS_TRUE.to_string()),
    };
    let literal = match &cmp.value {
        ComparisonValue::Atom(a) => render_atom(a, dialect),
        ComparisonValue::List(list) => render_list(list, dialect),
        ComparisonValue::Param(name) => {
            let value = params
                .get(name)
                .ok_or_else(|| ConditionError::ParameterNotFound(name.clone()))?;
            match value {
                ParamValue::Atom(a) => render_atom(a, dialect),
                ParamValue::List(list) => render_list(list, dialect),
            }
        }
        ComparisonValue::SubQuery(_) | ComparisonValue::SubQueryRef(_) => {
            return Ok(ALWAYS_TRUE.to_string())
        }
    };
    Ok(format!("{} {} {}", field, cmp.op.op_name(), literal))
}

fn render_atom(atom: &Atom, dialect: &dyn Dialect) -> String {
    match atom {
        Atom::Number(n) => render_number(*n),
        Atom::Text(s) => format!("'{}'", dialect.escape_string(s)),
        Atom::Bool(b) => b.to_string(),
        Atom::Null => "null".to_string(),
        Atom::Date(d) => format!("'{}'", d),
        Atom::DateTime(dt) => format!("'{}'", dt.to_rfc3339()),
    }
}

fn render_list(list: &[Atom], dialect: &dyn Dialect) -> String {
    let items: Vec<String> = list.iter().map(|a| render_atom(a, dialect)).collect();
    format!("({})", items.join(", "))
}

fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Condition, FieldPath};
    use chrono::NaiveDate;

    fn gt(field: &str) -> Condition {
        Condition::field_cmp(field, ComparisonOp::Gt, Atom::text(""))
    }

    fn render(cond: &Condition) -> String {
        render_condition(cond, &RawDialect, &ParamMap::new()).unwrap()
    }

    #[test]
    fn test_render_comparison() {
        assert_eq!(render(&gt("id")), "id > ''");
    }

    #[test]
    fn test_render_not() {
        assert_eq!(render(&Condition::not(gt("id"))), "(not id > '')");
    }

    #[test]
    fn test_render_connectives() {
        let cond = Condition::or(vec![gt("a"), Condition::and(vec![gt("b"), gt("c")])]);
        assert_eq!(render(&cond), "(a > '' or (b > '' and c > ''))");
    }

    #[test]
    fn test_render_literals() {
        let number = Condition::field_cmp("n", ComparisonOp::Eq, Atom::Number(-100.0));
        assert_eq!(render(&number), "n = -100");

        let boolean = Condition::field_cmp("b", ComparisonOp::Ne, Atom::Bool(true));
        assert_eq!(render(&boolean), "b != true");

        let null = Condition::field_cmp("x", ComparisonOp::Eq, Atom::Null);
        assert_eq!(render(&null), "x = null");

        let date = Condition::field_cmp(
            "d",
            ComparisonOp::Lt,
            Atom::Date(NaiveDate::from_ymd_opt(2020, 12, 31).unwrap()),
        );
        assert_eq!(render(&date), "d < '2020-12-31'");
    }

    #[test]
    fn test_render_in_list() {
        let cond = Condition::field_in(
            "id",
            ComparisonOp::In,
            vec![Atom::Number(-100.0), Atom::Null, Atom::text("x")],
        );
        assert_eq!(render(&cond), "id in (-100, null, 'x')");
    }

    #[test]
    fn test_render_params() {
        let mut params = ParamMap::new();
        params.insert(
            "ids".into(),
            crate::ast::ParamValue::List(vec![Atom::Number(1.0), Atom::Number(2.0)]),
        );
        let cond = Condition::cmp(
            ComparisonOp::In,
            ComparisonTarget::Field(FieldPath::parse("id")),
            ComparisonValue::Param("ids".into()),
        );
        assert_eq!(
            render_condition(&cond, &RawDialect, &params).unwrap(),
            "id in (1, 2)"
        );

        let missing = Condition::cmp(
            ComparisonOp::Eq,
            ComparisonTarget::Field(FieldPath::parse("id")),
            ComparisonValue::Param("absent".into()),
        );
        let err = render_condition(&missing, &RawDialect, &ParamMap::new()).unwrap_err();
        assert_eq!(err, ConditionError::ParameterNotFound("absent".into()));
    }

    #[test]
    fn test_unsupported_shapes_degrade_to_always_true() {
        let includes = Condition::field_in("ms", ComparisonOp::Includes, vec![Atom::text("a")]);
        assert_eq!(render(&includes), "(1=1)");
        assert_eq!(render(&Condition::True), "(1=1)");
    }

    #[test]
    fn test_render_and_list_joins() {
        let list = vec![gt("a"), gt("b")];
        assert_eq!(
            render_and_list(&list, &RawDialect, &ParamMap::new()).unwrap(),
            "a > '' and b > ''"
        );
    }

    #[test]
    fn test_render_deterministic() {
        let cond = Condition::and(vec![gt("a"), Condition::not(gt("b"))]);
        assert_eq!(render(&cond), render(&cond));
    }
}
