//! Query execution
//!
//! Drives a prepared query against the registered resolvers: primary
//! fetch, concurrent master joins, in-process filtering, grouping and
//! aggregation, detail subquery fan-out, sorting, windowing, and the
//! final strip of fields fetched only for internal needs.
//!
//! Condition lists handed to resolvers or evaluated in-process are
//! execution-owned clones with freshly assigned node ids, so memoized
//! dispatch state never crosses executions.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture};
use serde_json::Value;
use uuid::Uuid;

use crate::ast::{
    Atom, ComparisonOp, ComparisonTarget, ComparisonValue, Condition, FieldPath, ParamMap,
};
use crate::compiler::{Binding, CompiledSelectItem, PreparedQuery, PreparedSubQuery};
use crate::conditions::prune_to_source;
use crate::engine::{
    ExecutionHooks, HookEvent, QueryResolver, ResolverCapabilities, ResolverContext,
    ResolverRequest,
};
use crate::functions::{
    eval_group_call, eval_immediate_call, eval_row_call, FunctionError, FunctionKind,
    FunctionTable,
};
use crate::util::{get_field, get_path, get_path_mut, set_field, Record};

use super::errors::{ExecuteError, ExecuteResult};
use super::filters::{ConditionEvaluator, EvalScope, FilterState};
use super::grouping::group_rows;
use super::sorter::RecordSorter;

/// Shared inputs of one execution.
pub(crate) struct ExecEnv<'e> {
    pub functions: &'e FunctionTable,
    pub resolvers: &'e HashMap<String, Arc<dyn QueryResolver>>,
    pub default_resolver: Option<&'e Arc<dyn QueryResolver>>,
    pub hooks: Option<&'e dyn ExecutionHooks>,
    pub execution_id: Uuid,
    pub user_data: Option<Value>,
    nodes: AtomicU32,
}

impl<'e> ExecEnv<'e> {
    pub fn new(
        functions: &'e FunctionTable,
        resolvers: &'e HashMap<String, Arc<dyn QueryResolver>>,
        default_resolver: Option<&'e Arc<dyn QueryResolver>>,
        hooks: Option<&'e dyn ExecutionHooks>,
        execution_id: Uuid,
        user_data: Option<Value>,
        first_node: u32,
    ) -> Self {
        Self {
            functions,
            resolvers,
            default_resolver,
            hooks,
            execution_id,
            user_data,
            nodes: AtomicU32::new(first_node),
        }
    }

    fn next_node(&self) -> crate::ast::NodeId {
        crate::ast::NodeId(self.nodes.fetch_add(1, Ordering::Relaxed))
    }

    fn resolver_for(&self, source: &str) -> ExecuteResult<&'e dyn QueryResolver> {
        self.resolvers
            .get(&source.to_ascii_lowercase())
            .or(self.default_resolver)
            .map(|r| r.as_ref())
            .ok_or_else(|| ExecuteError::NoResolver(source.to_string()))
    }

    fn event(&self, path: &str) -> HookEvent {
        HookEvent {
            execution_id: self.execution_id,
            path: path.to_string(),
        }
    }
}

/// Runs one (sub)query level; `root` brackets the run with begin/end
/// hooks.
pub(crate) fn run_query<'a>(
    env: &'a ExecEnv<'a>,
    prepared: &'a PreparedQuery,
    params: &'a ParamMap,
    extra: Option<Condition>,
    parent: Option<Record>,
    root: bool,
) -> BoxFuture<'a, ExecuteResult<Vec<Record>>> {
    Box::pin(async move {
        if root {
            if let Some(hooks) = env.hooks {
                hooks.begin(&env.event(&prepared.primary_path));
            }
        }
        let result = run_inner(env, prepared, params, extra, parent).await;
        if root {
            if let Some(hooks) = env.hooks {
                hooks.end(&env.event(&prepared.primary_path), result.as_ref().err());
            }
        }
        result
    })
}

async fn run_inner(
    env: &ExecEnv<'_>,
    prepared: &PreparedQuery,
    params: &ParamMap,
    extra: Option<Condition>,
    parent: Option<Record>,
) -> ExecuteResult<Vec<Record>> {
    // Materialize where/having subqueries into value lists first; their
    // results substitute into the condition clones below.
    let mut sub_lists: Vec<Vec<Atom>> = Vec::with_capacity(prepared.condition_subqueries.len());
    for sub in &prepared.condition_subqueries {
        let rows = run_query(env, sub, params, None, None, false).await?;
        sub_lists.push(column_atoms(sub, &rows));
    }

    let mut where_list: Vec<Condition> = prepared.where_list.clone();
    if let Some(extra) = extra {
        where_list.push(extra);
    }
    let mut having_list: Vec<Condition> = prepared.having_list.clone();
    for cond in where_list.iter_mut().chain(having_list.iter_mut()) {
        cond.visit_comparisons_mut(&mut |cmp| {
            if let ComparisonValue::SubQueryRef(i) = cmp.value {
                cmp.value = ComparisonValue::List(sub_lists[i].clone());
            }
        });
        cond.renumber(&mut || env.next_node());
    }

    // Primary fetch. Conditions referencing projected aliases only make
    // sense on the post-projection shape, so they are withheld from the
    // resolver entirely.
    let primary = prepared.primary();
    let withhold = prepared.where_uses_projected_alias;
    let pruned = if withhold {
        Vec::new()
    } else {
        prune_list(&primary.path, &where_list)
    };
    let offer_window = prepared.bindings.len() == 1
        && !prepared.grouped
        && !withhold
        && prepared.select_subqueries.is_empty();
    let fields = requested_fields(primary);
    let resolver = env.resolver_for(&primary.source)?;
    let mut ctx = ResolverContext {
        execution_id: env.execution_id,
        source: primary.source.clone(),
        path: primary.path.clone(),
        direction: primary.direction,
        foreign_key: primary.foreign_key.clone(),
        parent_source: primary.parent_source.clone(),
        parent_record: parent,
        user_data: env.user_data.clone(),
        capabilities: ResolverCapabilities::default(),
    };
    let request = ResolverRequest {
        fields: &fields,
        conditions: &pruned,
        order_by: if offer_window {
            prepared.order_by.as_slice()
        } else {
            &[]
        },
        limit: if offer_window { prepared.limit } else { None },
        offset: if offer_window { prepared.offset } else { None },
        params,
    };
    let mut rows = resolver
        .query(request, &mut ctx)
        .await
        .map_err(|e| ExecuteError::resolver(&primary.source, e))?;
    // A claim only counts for what was actually offered: the window
    // flags when the window was pushed down, filtering when the
    // condition list was delivered.
    let mut caps = ctx.capabilities;
    if !offer_window {
        caps.sorting = false;
        caps.limit = false;
        caps.offset = false;
    }
    if withhold {
        caps.filtering = false;
    }

    // Master joins, one concurrent batch per binding level.
    if prepared.bindings.len() > 1 {
        if let Some(hooks) = env.hooks {
            hooks.before_master_sub_queries(&env.event(&prepared.primary_path));
        }
        for binding in &prepared.bindings[1..] {
            attach_master(env, prepared, binding, &where_list, params, &mut rows).await?;
        }
        if let Some(hooks) = env.hooks {
            hooks.after_master_sub_queries(&env.event(&prepared.primary_path));
        }
    }

    if withhold {
        // Alias targets read computed columns; compute before filtering.
        compute_select_functions(env.functions, prepared, &mut rows)?;
    }

    // A filtering claim covers the scope-local list the resolver was
    // handed; absent the claim, the engine evaluates the full tree over
    // the joined rows.
    if !caps.filtering && !where_list.is_empty() {
        let scope = EvalScope {
            functions: env.functions,
            params,
            grouping: false,
            group_fields: &[],
            base: &prepared.primary_segments,
        };
        let mut state = FilterState::new();
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            if ConditionEvaluator::matches_row(&scope, &mut state, &row, &where_list)? {
                kept.push(row);
            }
        }
        rows = kept;
    }

    if prepared.grouped {
        rows = run_grouped(env, prepared, params, &having_list, rows)?;
    } else {
        if !withhold {
            compute_select_functions(env.functions, prepared, &mut rows)?;
        }
        if !prepared.select_subqueries.is_empty() {
            if let Some(hooks) = env.hooks {
                hooks.before_detail_sub_queries(&env.event(&prepared.primary_path));
            }
            for sub in &prepared.select_subqueries {
                attach_details(env, sub, params, &mut rows).await?;
            }
            if let Some(hooks) = env.hooks {
                hooks.after_detail_sub_queries(&env.event(&prepared.primary_path));
            }
        }
    }

    if !prepared.order_by.is_empty() && !caps.sorting {
        RecordSorter::sort(&mut rows, &prepared.order_by);
    }
    if !caps.offset {
        if let Some(offset) = prepared.offset {
            let skip = (offset as usize).min(rows.len());
            rows.drain(..skip);
        }
    }
    if !caps.limit {
        if let Some(limit) = prepared.limit {
            rows.truncate(limit as usize);
        }
    }

    if !prepared.grouped {
        apply_field_aliases(prepared, &mut rows);
        strip_unrequested(prepared, &mut rows);
    }
    Ok(rows)
}

/// Fetches and attaches one master binding's records: distinct foreign
/// keys across the parent rows, one concurrent single-row fetch each.
async fn attach_master(
    env: &ExecEnv<'_>,
    prepared: &PreparedQuery,
    binding: &Binding,
    where_list: &[Condition],
    params: &ParamMap,
    rows: &mut [Record],
) -> ExecuteResult<()> {
    let (Some(foreign_key), Some(relationship)) = (&binding.foreign_key, &binding.relationship)
    else {
        return Ok(());
    };
    let parent_rel = parent_relative(prepared, binding);

    let mut seen: HashSet<String> = HashSet::new();
    let mut wanted: Vec<Value> = Vec::new();
    for row in rows.iter() {
        let Some(parent_obj) = parent_object(row, &parent_rel) else {
            continue;
        };
        let Some(fk) = get_field(parent_obj, foreign_key).filter(|v| !v.is_null()) else {
            continue;
        };
        if seen.insert(fk.to_string()) {
            wanted.push(fk.clone());
        }
    }

    let pruned = prune_list(&binding.path, where_list);
    let fields = requested_fields(binding);
    let resolver = env.resolver_for(&binding.source)?;

    let fetches = wanted.iter().map(|fk| {
        let mut conds = pruned.clone();
        conds.push(Condition::cmp(
            ComparisonOp::Eq,
            ComparisonTarget::Field(FieldPath::parse(&binding.id_field)),
            ComparisonValue::Atom(value_atom(fk)),
        ));
        for cond in &mut conds {
            cond.renumber(&mut || env.next_node());
        }
        let mut ctx = ResolverContext {
            execution_id: env.execution_id,
            source: binding.source.clone(),
            path: binding.path.clone(),
            direction: binding.direction,
            foreign_key: Some(foreign_key.clone()),
            parent_source: binding.parent_source.clone(),
            parent_record: None,
            user_data: env.user_data.clone(),
            capabilities: ResolverCapabilities::default(),
        };
        let fields = &fields;
        let functions = env.functions;
        let source = binding.source.clone();
        async move {
            let request = ResolverRequest {
                fields,
                conditions: &conds,
                order_by: &[],
                limit: Some(1),
                offset: None,
                params,
            };
            let records = resolver
                .query(request, &mut ctx)
                .await
                .map_err(|e| ExecuteError::resolver(&source, e))?;
            if ctx.capabilities.filtering {
                return Ok(records.into_iter().next());
            }
            // The resolver did not apply the join conditions; do it here.
            let scope = EvalScope {
                functions,
                params,
                grouping: false,
                group_fields: &[],
                base: &[],
            };
            let mut state = FilterState::new();
            for record in records {
                if ConditionEvaluator::matches_row(&scope, &mut state, &record, &conds)? {
                    return Ok(Some(record));
                }
            }
            Ok(None)
        }
    });
    let results: Vec<ExecuteResult<Option<Record>>> = join_all(fetches).await;

    let mut by_key: HashMap<String, Record> = HashMap::new();
    for (fk, result) in wanted.iter().zip(results) {
        if let Some(record) = result? {
            by_key.insert(fk.to_string(), record);
        }
    }

    for row in rows.iter_mut() {
        let Some(parent_obj) = parent_object_mut(row, &parent_rel) else {
            continue;
        };
        let matched = get_field(parent_obj, foreign_key)
            .filter(|v| !v.is_null())
            .map(Value::to_string)
            .and_then(|key| by_key.get(&key).cloned());
        let value = match matched {
            Some(record) => Value::Object(record),
            None => Value::Null,
        };
        set_field(parent_obj, relationship, value);
    }
    Ok(())
}

/// Runs one detail subquery per parent row, concurrently, and attaches
/// each result set under the relationship name.
async fn attach_details(
    env: &ExecEnv<'_>,
    sub: &PreparedSubQuery,
    params: &ParamMap,
    rows: &mut [Record],
) -> ExecuteResult<()> {
    let fk_path = format!("{}.{}", sub.prepared.primary_path, sub.foreign_key);
    let fetches = rows.iter().map(|row| {
        let parent_id = get_field(row, &sub.parent_id_field)
            .filter(|v| !v.is_null())
            .cloned();
        let parent = row.clone();
        let fk_path = fk_path.clone();
        async move {
            let Some(parent_id) = parent_id else {
                return Ok(Vec::new());
            };
            let extra = Condition::cmp(
                ComparisonOp::Eq,
                ComparisonTarget::Field(FieldPath::parse(&fk_path)),
                ComparisonValue::Atom(value_atom(&parent_id)),
            );
            run_query(env, &sub.prepared, params, Some(extra), Some(parent), false).await
        }
    });
    let results = join_all(fetches).await;
    for (row, result) in rows.iter_mut().zip(results) {
        let children = result?;
        let array = children.into_iter().map(Value::Object).collect();
        set_field(row, &sub.relationship, Value::Array(array));
    }
    Ok(())
}

/// Grouped projection: filter groups through the having list, then build
/// one output record per surviving group.
fn run_grouped(
    env: &ExecEnv<'_>,
    prepared: &PreparedQuery,
    params: &ParamMap,
    having_list: &[Condition],
    rows: Vec<Record>,
) -> ExecuteResult<Vec<Record>> {
    if prepared.group_by.is_empty() && rows.len() > 1 {
        return Err(ExecuteError::Grouping(
            "aggregate select without group-by requires at most one row".into(),
        ));
    }
    let group_names: Vec<String> = prepared
        .group_by
        .iter()
        .map(|g| g.rsplit('.').next().unwrap_or(g.as_str()).to_string())
        .collect();
    let scope = EvalScope {
        functions: env.functions,
        params,
        grouping: true,
        group_fields: &group_names,
        base: &prepared.primary_segments,
    };
    let mut state = FilterState::new();

    let mut out = Vec::new();
    for group in group_rows(rows, &prepared.group_by) {
        if !having_list.is_empty()
            && !ConditionEvaluator::matches_group(&scope, &mut state, &group, having_list)?
        {
            continue;
        }
        out.push(project_group(env, prepared, &group_names, &group)?);
    }
    Ok(out)
}

fn project_group(
    env: &ExecEnv<'_>,
    prepared: &PreparedQuery,
    group_names: &[String],
    group: &[Record],
) -> ExecuteResult<Record> {
    let mut out = Record::new();
    let first = &group[0];
    for item in &prepared.select {
        match item {
            CompiledSelectItem::Field { path, field, alias, .. } => {
                let relative = prepared.relative_path(path);
                let is_grouped = prepared
                    .group_by
                    .iter()
                    .any(|g| g.eq_ignore_ascii_case(&relative.dotted()));
                if !is_grouped {
                    return Err(FunctionError::AggregateNeeded(field.clone()).into());
                }
                let value = get_path(first, &relative.segments)
                    .cloned()
                    .unwrap_or(Value::Null);
                let key = alias.as_deref().unwrap_or(field.as_str());
                set_field(&mut out, key, value);
            }
            CompiledSelectItem::Function { call, kind, output } => {
                let value = match kind {
                    FunctionKind::Aggregate => eval_group_call(env.functions, call, group)?,
                    FunctionKind::ImmediateScalar => eval_immediate_call(env.functions, call)?,
                    FunctionKind::Scalar => {
                        let all_grouped = call.field_args().all(|path| {
                            group_names
                                .iter()
                                .any(|g| g.eq_ignore_ascii_case(path.field_name()))
                        });
                        if !all_grouped {
                            return Err(FunctionError::AggregateNeeded(call.name.clone()).into());
                        }
                        eval_row_call(env.functions, call, first)?
                    }
                };
                set_field(&mut out, output, value);
            }
            // Rejected at compile time for grouped queries.
            CompiledSelectItem::SubQuery { .. } => {}
        }
    }
    Ok(out)
}

/// Evaluates scalar and immediate select functions, adding their output
/// columns to every row.
fn compute_select_functions(
    functions: &FunctionTable,
    prepared: &PreparedQuery,
    rows: &mut [Record],
) -> ExecuteResult<()> {
    for item in &prepared.select {
        let CompiledSelectItem::Function { call, kind, output } = item else {
            continue;
        };
        match kind {
            FunctionKind::Scalar => {
                for row in rows.iter_mut() {
                    let value = eval_row_call(functions, call, row)?;
                    set_field(row, output, value);
                }
            }
            FunctionKind::ImmediateScalar => {
                let value = eval_immediate_call(functions, call)?;
                for row in rows.iter_mut() {
                    set_field(row, output, value.clone());
                }
            }
            FunctionKind::Aggregate => {}
        }
    }
    Ok(())
}

/// Hoists aliased select fields to top-level output columns.
fn apply_field_aliases(prepared: &PreparedQuery, rows: &mut [Record]) {
    for item in &prepared.select {
        let CompiledSelectItem::Field {
            path,
            alias: Some(alias),
            ..
        } = item
        else {
            continue;
        };
        let relative = prepared.relative_path(path);
        for row in rows.iter_mut() {
            let value = get_path(row, &relative.segments)
                .cloned()
                .unwrap_or(Value::Null);
            set_field(row, alias, value);
        }
    }
}

/// Removes fields fetched only for filtering, sorting, or join keys, and
/// attached objects no select item reaches into.
fn strip_unrequested(prepared: &PreparedQuery, rows: &mut [Record]) {
    let bindings = &prepared.bindings;
    let n = bindings.len();

    // A binding's attachment survives when it or any descendant outputs
    // fields. Bindings are depth-ordered, so one reverse pass settles it.
    let mut retain = vec![false; n];
    let mut keep: Vec<HashSet<String>> = vec![HashSet::new(); n];
    for i in (0..n).rev() {
        if !bindings[i].fields.select.is_empty() {
            retain[i] = true;
        }
        if retain[i] && i > 0 {
            if let (Some(parent_path), Some(relationship)) =
                (&bindings[i].parent_path, &bindings[i].relationship)
            {
                if let Some(j) = bindings
                    .iter()
                    .position(|b| b.path.eq_ignore_ascii_case(parent_path))
                {
                    keep[j].insert(relationship.to_ascii_lowercase());
                    retain[j] = true;
                }
            }
        }
    }

    for item in &prepared.select {
        match item {
            CompiledSelectItem::Field {
                binding_path,
                field,
                alias,
                ..
            } => match alias {
                Some(alias) => {
                    keep[0].insert(alias.to_ascii_lowercase());
                }
                None => {
                    if let Some(i) = bindings
                        .iter()
                        .position(|b| b.path.eq_ignore_ascii_case(binding_path))
                    {
                        keep[i].insert(field.to_ascii_lowercase());
                    }
                }
            },
            CompiledSelectItem::Function { output, .. } => {
                keep[0].insert(output.to_ascii_lowercase());
            }
            CompiledSelectItem::SubQuery { relationship, .. } => {
                keep[0].insert(relationship.to_ascii_lowercase());
            }
        }
    }

    // Deepest bindings first, so children are stripped before a parent
    // pass can drop an unrequested attachment altogether.
    for i in (0..n).rev() {
        let relative = binding_relative(prepared, &bindings[i]);
        for row in rows.iter_mut() {
            if relative.is_empty() {
                strip_object(row, &keep[i]);
            } else if let Some(Value::Object(obj)) = get_path_mut(row, &relative) {
                strip_object(obj, &keep[i]);
            }
        }
    }
}

fn strip_object(obj: &mut Record, keep: &HashSet<String>) {
    let drop: Vec<String> = obj
        .keys()
        .filter(|k| !keep.contains(&k.to_ascii_lowercase()))
        .cloned()
        .collect();
    for key in drop {
        obj.remove(&key);
    }
}

fn prune_list(path: &str, conds: &[Condition]) -> Vec<Condition> {
    conds
        .iter()
        .map(|c| prune_to_source(path, c))
        .filter(|c| !c.is_true())
        .collect()
}

fn requested_fields(binding: &Binding) -> Vec<String> {
    let mut fields = binding.fields.requested();
    fields.insert(binding.id_field.clone());
    fields.into_iter().collect()
}

fn binding_relative(prepared: &PreparedQuery, binding: &Binding) -> Vec<String> {
    let segments: Vec<String> = binding.path.split('.').map(String::from).collect();
    FieldPath::new(segments)
        .strip_prefix(&prepared.primary_segments)
        .map(|p| p.segments)
        .unwrap_or_default()
}

fn parent_relative(prepared: &PreparedQuery, binding: &Binding) -> Vec<String> {
    match &binding.parent_path {
        Some(parent) => {
            let segments: Vec<String> = parent.split('.').map(String::from).collect();
            FieldPath::new(segments)
                .strip_prefix(&prepared.primary_segments)
                .map(|p| p.segments)
                .unwrap_or_default()
        }
        None => Vec::new(),
    }
}

fn parent_object<'r>(row: &'r Record, relative: &[String]) -> Option<&'r Record> {
    if relative.is_empty() {
        return Some(row);
    }
    match get_path(row, relative) {
        Some(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

fn parent_object_mut<'r>(row: &'r mut Record, relative: &[String]) -> Option<&'r mut Record> {
    if relative.is_empty() {
        return Some(row);
    }
    match get_path_mut(row, relative) {
        Some(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

/// Output column values of a condition subquery, as an in-list. Nulls
/// are dropped; they can never match a membership test.
fn column_atoms(sub: &PreparedQuery, rows: &[Record]) -> Vec<Atom> {
    let key = match &sub.select[0] {
        CompiledSelectItem::Field { field, alias, .. } => alias.as_deref().unwrap_or(field),
        CompiledSelectItem::Function { output, .. } => output.as_str(),
        CompiledSelectItem::SubQuery { .. } => return Vec::new(),
    };
    rows.iter()
        .filter_map(|row| get_field(row, key))
        .filter_map(|v| match v {
            Value::Number(n) => n.as_f64().map(Atom::Number),
            Value::String(s) => Some(Atom::Text(s.clone())),
            Value::Bool(b) => Some(Atom::Bool(*b)),
            _ => None,
        })
        .collect()
}

fn value_atom(v: &Value) -> Atom {
    match v {
        Value::Number(n) => n.as_f64().map(Atom::Number).unwrap_or(Atom::Null),
        Value::String(s) => Atom::Text(s.clone()),
        Value::Bool(b) => Atom::Bool(*b),
        _ => Atom::Null,
    }
}
