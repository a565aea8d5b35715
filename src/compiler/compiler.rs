//! Query normalizer
//!
//! Resolves aliases and relationship paths once, producing an
//! execution-ready `PreparedQuery`: validated bindings in dependency
//! order, per-binding field registries, flattened condition lists, and
//! compiled nested subqueries. The prepared form is immutable and
//! shareable; executions clone the condition lists they personalize.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::ast::{
    Condition, ComparisonTarget, ComparisonValue, FieldPath, FunctionCall, NodeId, Query,
    SelectItem, SortKey,
};
use crate::conditions::flatten_to_and_list;
use crate::functions::{FunctionKind, FunctionTable};

use super::errors::{CompileError, CompileResult};
use super::graph::{JoinDirection, NamingRules, PathNode, RelationshipGraph, ResolverTree};

/// Bound on iterative alias expansion, preventing alias cycles.
const MAX_ALIAS_EXPANSIONS: usize = 10;

/// Compilation inputs: the static configuration the normalizer consults.
pub struct CompilerEnv<'a> {
    pub graph: &'a RelationshipGraph,
    pub naming: &'a NamingRules,
    pub functions: &'a FunctionTable,
}

/// Field names a binding must fetch, by the clause that needs them.
#[derive(Debug, Clone, Default)]
pub struct FieldRegistry {
    pub select: BTreeSet<String>,
    pub filter: BTreeSet<String>,
    pub having: BTreeSet<String>,
    pub sort: BTreeSet<String>,
    pub group: BTreeSet<String>,
    pub relation: BTreeSet<String>,
}

impl FieldRegistry {
    /// Union of every need: the field set requested from the resolver.
    pub fn requested(&self) -> BTreeSet<String> {
        let mut all = BTreeSet::new();
        for set in [
            &self.select,
            &self.filter,
            &self.having,
            &self.sort,
            &self.group,
            &self.relation,
        ] {
            all.extend(set.iter().cloned());
        }
        all
    }

    /// Whether a field (case-insensitively) is selected for output.
    pub fn is_selected(&self, name: &str) -> bool {
        self.select.iter().any(|f| f.eq_ignore_ascii_case(name))
    }
}

/// An execution-ready from entry.
#[derive(Debug, Clone)]
pub struct Binding {
    /// True-cased dotted graph path; the primary binding's path is the
    /// source name itself (or the relationship path for subqueries).
    pub path: String,
    pub alias: Option<String>,
    /// True-cased source name.
    pub source: String,
    pub parent_path: Option<String>,
    pub parent_source: Option<String>,
    /// True-cased relationship name the binding is attached under.
    pub relationship: Option<String>,
    /// None on the primary binding.
    pub direction: Option<JoinDirection>,
    pub foreign_key: Option<String>,
    pub id_field: String,
    pub fields: FieldRegistry,
}

impl Binding {
    fn from_node(node: &PathNode, alias: Option<String>) -> Self {
        Self {
            path: node.path.clone(),
            alias,
            source: node.source.clone(),
            parent_path: node.parent_path.clone(),
            parent_source: node.parent_source.clone(),
            relationship: node.relationship.clone(),
            direction: node.direction,
            foreign_key: node.foreign_key.clone(),
            id_field: node.id_field.clone(),
            fields: FieldRegistry::default(),
        }
    }

    /// Path depth in segments; drives dependency ordering.
    pub fn depth(&self) -> usize {
        self.path.split('.').count()
    }
}

/// A normalized select-list entry.
#[derive(Debug, Clone)]
pub enum CompiledSelectItem {
    Field {
        /// Fully qualified true-cased path.
        path: FieldPath,
        /// Dotted path of the owning binding.
        binding_path: String,
        /// Local field name.
        field: String,
        alias: Option<String>,
    },
    Function {
        /// Call with primary-relative field arguments.
        call: FunctionCall,
        kind: FunctionKind,
        /// Output column name: the alias, or the function name.
        output: String,
    },
    SubQuery {
        /// Index into `PreparedQuery::select_subqueries`.
        index: usize,
        /// Relationship field name results attach under.
        relationship: String,
    },
}

/// A compiled select-level subquery and the join bookkeeping to fan it
/// out per parent row.
#[derive(Debug, Clone)]
pub struct PreparedSubQuery {
    pub prepared: PreparedQuery,
    /// Binding path the relationship hangs off.
    pub parent_path: String,
    pub relationship: String,
    /// Foreign-key field on the detail rows, matched to the parent's id.
    pub foreign_key: String,
    pub parent_id_field: String,
}

/// The reusable compiled form of a query.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub primary_path: String,
    pub primary_segments: Vec<String>,
    /// Dependency order: primary first, then ascending path length.
    pub bindings: Vec<Binding>,
    pub select: Vec<CompiledSelectItem>,
    pub where_list: Vec<Condition>,
    pub having_list: Vec<Condition>,
    /// Primary-relative dotted group-by field names.
    pub group_by: Vec<String>,
    /// Primary-relative sort keys (or bare select aliases).
    pub order_by: Vec<SortKey>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Whether grouping/aggregation applies to this query.
    pub grouped: bool,
    /// Conditions reference a select alias that only exists on the
    /// post-projection record shape; pushdown must be disabled.
    pub where_uses_projected_alias: bool,
    /// Where/having nested subqueries, referenced by `SubQueryRef`.
    pub condition_subqueries: Vec<PreparedQuery>,
    pub select_subqueries: Vec<PreparedSubQuery>,
    /// Number of comparison node ids assigned to this query's lists.
    pub node_count: u32,
}

impl PreparedQuery {
    /// The primary binding.
    pub fn primary(&self) -> &Binding {
        &self.bindings[0]
    }

    /// Binding lookup by dotted path, case-insensitive.
    pub fn binding(&self, path: &str) -> Option<&Binding> {
        self.bindings
            .iter()
            .find(|b| b.path.eq_ignore_ascii_case(path))
    }

    /// Strips the primary prefix off a qualified path, yielding the
    /// record-relative remainder.
    pub fn relative_path(&self, path: &FieldPath) -> FieldPath {
        path.strip_prefix(&self.primary_segments)
            .filter(|p| !p.segments.is_empty())
            .unwrap_or_else(|| path.clone())
    }
}

/// Normalizes a query against the configured graph and function table.
pub fn compile(env: &CompilerEnv, query: &Query) -> CompileResult<PreparedQuery> {
    Normalizer::run(env, query, &HashMap::new(), None)
}

#[derive(Clone, Copy, PartialEq)]
enum Clause {
    Select,
    Where,
    Having,
    GroupBy,
    OrderBy,
}

enum QualifiedField {
    Path(FieldPath),
    /// Single-segment name naming a select-introduced projection alias.
    ProjectedAlias(String),
}

struct Normalizer<'a> {
    env: &'a CompilerEnv<'a>,
    tree: ResolverTree,
    primary_segments: Vec<String>,
    /// Binding alias -> qualified dotted path (lowercased keys).
    aliases: HashMap<String, String>,
    /// Select field alias -> underlying qualified path.
    field_aliases: HashMap<String, FieldPath>,
    /// Select function-call alias names.
    function_aliases: HashSet<String>,
    /// Qualified binding paths with their aliases, registration order.
    from_entries: Vec<(String, Option<String>)>,
    where_uses_projected_alias: bool,
    condition_subqueries: Vec<PreparedQuery>,
    select_subqueries: Vec<PreparedSubQuery>,
}

impl<'a> Normalizer<'a> {
    fn run(
        env: &'a CompilerEnv<'a>,
        query: &Query,
        parent_aliases: &HashMap<String, String>,
        parent_primary: Option<&[String]>,
    ) -> CompileResult<PreparedQuery> {
        let first = query
            .from
            .first()
            .ok_or_else(|| CompileError::MalformedQuery("from list is empty".into()))?;

        let mut aliases = parent_aliases.clone();
        let raw_primary = expand_alias_prefix(&aliases, &first.path)?;
        let primary_dotted = match parent_primary {
            None => {
                if raw_primary.contains('.') {
                    return Err(CompileError::MalformedQuery(format!(
                        "root query must select from a source, got path {}",
                        raw_primary
                    )));
                }
                raw_primary
            }
            Some(parent) => {
                let parent_dotted = parent.join(".");
                if raw_primary
                    .to_ascii_lowercase()
                    .starts_with(&parent_dotted.to_ascii_lowercase())
                {
                    raw_primary
                } else {
                    format!("{}.{}", parent_dotted, raw_primary)
                }
            }
        };

        let root_source = primary_dotted.split('.').next().unwrap_or(&primary_dotted);
        let mut tree = ResolverTree::new(env.graph, env.naming, root_source)?;
        let primary_node = tree.resolve_path(env.graph, env.naming, &primary_dotted)?;
        let primary_segments: Vec<String> =
            primary_node.path.split('.').map(String::from).collect();

        if let Some(alias) = &first.alias {
            aliases.insert(alias.to_ascii_lowercase(), primary_node.path.clone());
        }

        let mut this = Normalizer {
            env,
            tree,
            primary_segments,
            aliases,
            field_aliases: HashMap::new(),
            function_aliases: HashSet::new(),
            from_entries: vec![(primary_node.path.clone(), first.alias.clone())],
            where_uses_projected_alias: false,
            condition_subqueries: Vec::new(),
            select_subqueries: Vec::new(),
        };

        // Remaining from entries: alias-expand, re-qualify, validate.
        for entry in query.from.iter().skip(1) {
            let expanded = expand_alias_prefix(&this.aliases, &entry.path)?;
            let qualified = this.qualify_dotted(&expanded);
            let node = this
                .tree
                .resolve_path(env.graph, env.naming, &qualified)?;
            this.push_from(&node.path, entry.alias.clone());
            if let Some(alias) = &entry.alias {
                this.aliases.insert(alias.to_ascii_lowercase(), node.path);
            }
        }

        let select = this.normalize_select(&query.select)?;
        let where_list = match &query.where_clause {
            Some(cond) => {
                let normalized = this.normalize_condition(cond, Clause::Where)?;
                flatten_to_and_list(&normalized)
            }
            None => Vec::new(),
        };
        let having_list = match &query.having_clause {
            Some(cond) => {
                let normalized = this.normalize_condition(cond, Clause::Having)?;
                flatten_to_and_list(&normalized)
            }
            None => Vec::new(),
        };
        let group_by = this.normalize_group_by(&query.group_by)?;
        let order_by = this.normalize_order_by(&query.order_by)?;

        let grouped = !group_by.is_empty()
            || query.having_clause.is_some()
            || select.iter().any(|item| {
                matches!(
                    item,
                    CompiledSelectItem::Function {
                        kind: FunctionKind::Aggregate,
                        ..
                    }
                )
            });

        if grouped && !this.select_subqueries.is_empty() {
            return Err(CompileError::MalformedQuery(
                "subquery selects cannot be combined with grouping".into(),
            ));
        }

        let mut prepared = PreparedQuery {
            primary_path: this.from_entries[0].0.clone(),
            primary_segments: this.primary_segments.clone(),
            bindings: Vec::new(),
            select,
            where_list,
            having_list,
            group_by,
            order_by,
            limit: query.limit,
            offset: query.offset,
            grouped,
            where_uses_projected_alias: this.where_uses_projected_alias,
            condition_subqueries: std::mem::take(&mut this.condition_subqueries),
            select_subqueries: std::mem::take(&mut this.select_subqueries),
            node_count: 0,
        };

        this.build_bindings(&mut prepared)?;
        assign_node_ids(&mut prepared);
        Ok(prepared)
    }

    /// Prefixes a dotted path with the primary path unless already there.
    fn qualify_dotted(&self, dotted: &str) -> String {
        let segments: Vec<&str> = dotted.split('.').collect();
        let prefix_matches = segments.len() >= self.primary_segments.len()
            && segments
                .iter()
                .zip(self.primary_segments.iter())
                .all(|(a, b)| a.eq_ignore_ascii_case(b));
        if prefix_matches {
            dotted.to_string()
        } else {
            format!("{}.{}", self.primary_segments.join("."), dotted)
        }
    }

    fn push_from(&mut self, path: &str, alias: Option<String>) {
        if !self
            .from_entries
            .iter()
            .any(|(p, _)| p.eq_ignore_ascii_case(path))
        {
            self.from_entries.push((path.to_string(), alias));
        }
    }

    /// Resolves a field reference into a qualified true-cased path,
    /// expanding aliases and auto-registering newly referenced join
    /// paths into the from list.
    fn qualify_field(&mut self, path: &FieldPath, clause: Clause) -> CompileResult<QualifiedField> {
        if path.segments.len() == 1 {
            let name = &path.segments[0];
            let lower = name.to_ascii_lowercase();
            if clause != Clause::Select {
                if let Some(underlying) = self.field_aliases.get(&lower) {
                    return Ok(QualifiedField::Path(underlying.clone()));
                }
                if self.function_aliases.contains(&lower) {
                    return Ok(QualifiedField::ProjectedAlias(name.clone()));
                }
            }
            let mut segments = self.primary_segments.clone();
            segments.push(name.clone());
            return Ok(QualifiedField::Path(FieldPath::new(segments)));
        }

        let mut segments = path.segments.clone();
        for _ in 0..MAX_ALIAS_EXPANSIONS {
            let lower = segments[0].to_ascii_lowercase();
            let Some(expansion) = self.aliases.get(&lower) else {
                break;
            };
            let mut expanded: Vec<String> = expansion.split('.').map(String::from).collect();
            if expanded.len() == 1 && expanded[0].eq_ignore_ascii_case(&segments[0]) {
                break;
            }
            expanded.extend(segments.into_iter().skip(1));
            segments = expanded;
        }
        if self.aliases.contains_key(&segments[0].to_ascii_lowercase())
            && !segments[0].eq_ignore_ascii_case(&self.primary_segments[0])
        {
            return Err(CompileError::AliasCycle(path.dotted()));
        }

        let dotted = self.qualify_dotted(&segments.join("."));
        let full = FieldPath::parse(&dotted);
        let parent = full.parent_dotted();
        let node = self
            .tree
            .resolve_path(self.env.graph, self.env.naming, &parent)?;
        self.push_from(&node.path, None);
        let mut corrected: Vec<String> = node.path.split('.').map(String::from).collect();
        corrected.push(full.field_name().to_string());
        Ok(QualifiedField::Path(FieldPath::new(corrected)))
    }

    fn normalize_select(&mut self, items: &[SelectItem]) -> CompileResult<Vec<CompiledSelectItem>> {
        let mut compiled = Vec::with_capacity(items.len());
        for item in items {
            match item {
                SelectItem::Field { path, alias } => {
                    let qualified = match self.qualify_field(path, Clause::Select)? {
                        QualifiedField::Path(p) => p,
                        QualifiedField::ProjectedAlias(name) => {
                            return Err(CompileError::MalformedQuery(format!(
                                "select field {} shadows a projection alias",
                                name
                            )))
                        }
                    };
                    if let Some(alias) = alias {
                        self.field_aliases
                            .insert(alias.to_ascii_lowercase(), qualified.clone());
                    }
                    compiled.push(CompiledSelectItem::Field {
                        binding_path: qualified.parent_dotted(),
                        field: qualified.field_name().to_string(),
                        path: qualified,
                        alias: alias.clone(),
                    });
                }
                SelectItem::Function { call, alias } => {
                    let def = self
                        .env
                        .functions
                        .get(&call.name)
                        .ok_or_else(|| CompileError::UnknownFunction(call.name.clone()))?;
                    let kind = def.kind;
                    let mut localized = call.clone();
                    for arg in localized.field_args_mut() {
                        let qualified = match self.qualify_field(arg, Clause::Select)? {
                            QualifiedField::Path(p) => p,
                            QualifiedField::ProjectedAlias(name) => {
                                return Err(CompileError::MalformedQuery(format!(
                                    "function argument {} references a projection alias",
                                    name
                                )))
                            }
                        };
                        *arg = qualified
                            .strip_prefix(&self.primary_segments)
                            .filter(|p| !p.segments.is_empty())
                            .unwrap_or(qualified);
                    }
                    let output = alias.clone().unwrap_or_else(|| call.name.clone());
                    if let Some(alias) = alias {
                        self.function_aliases.insert(alias.to_ascii_lowercase());
                    }
                    compiled.push(CompiledSelectItem::Function {
                        call: localized,
                        kind,
                        output,
                    });
                }
                SelectItem::SubQuery(sub) => {
                    let index = self.compile_select_subquery(sub)?;
                    let relationship = self.select_subqueries[index].relationship.clone();
                    compiled.push(CompiledSelectItem::SubQuery {
                        index,
                        relationship,
                    });
                }
            }
        }
        Ok(compiled)
    }

    fn compile_select_subquery(&mut self, sub: &Query) -> CompileResult<usize> {
        let prepared = Normalizer::run(
            self.env,
            sub,
            &self.aliases,
            Some(&self.primary_segments.clone()),
        )?;
        let node = self.tree.resolve_path(
            self.env.graph,
            self.env.naming,
            &prepared.primary_path,
        )?;
        if node.direction != Some(JoinDirection::Detail) {
            return Err(CompileError::MalformedQuery(format!(
                "select subquery must target a details relationship: {}",
                prepared.primary_path
            )));
        }
        let primary_dotted = self.primary_segments.join(".");
        if node.parent_path.as_deref() != Some(primary_dotted.as_str()) {
            return Err(CompileError::MalformedQuery(format!(
                "select subquery must be a direct child of the primary binding: {}",
                prepared.primary_path
            )));
        }
        let parent_source = node
            .parent_source
            .clone()
            .unwrap_or_else(|| self.primary_segments[0].clone());
        let sub = PreparedSubQuery {
            parent_path: node.parent_path.clone().unwrap_or_default(),
            relationship: node.relationship.clone().unwrap_or_default(),
            foreign_key: node
                .foreign_key
                .clone()
                .unwrap_or_else(|| self.env.naming.foreign_id_field_name(&parent_source)),
            parent_id_field: self.env.naming.id_field_name(&parent_source),
            prepared,
        };
        self.select_subqueries.push(sub);
        Ok(self.select_subqueries.len() - 1)
    }

    fn normalize_condition(&mut self, cond: &Condition, clause: Clause) -> CompileResult<Condition> {
        match cond {
            Condition::And(cs) => Ok(Condition::And(self.normalize_children(cs, clause)?)),
            Condition::Or(cs) => Ok(Condition::Or(self.normalize_children(cs, clause)?)),
            Condition::Not(cs) => Ok(Condition::Not(self.normalize_children(cs, clause)?)),
            Condition::True => Ok(Condition::True),
            Condition::Comparison(cmp) => {
                let mut cmp = cmp.clone();
                cmp.target = match &cmp.target {
                    ComparisonTarget::Field(path) => {
                        match self.qualify_field(path, clause)? {
                            QualifiedField::Path(p) => ComparisonTarget::Field(p),
                            QualifiedField::ProjectedAlias(name) => {
                                if clause == Clause::Where {
                                    self.where_uses_projected_alias = true;
                                }
                                ComparisonTarget::Field(FieldPath::new(vec![name]))
                            }
                        }
                    }
                    ComparisonTarget::Function(call) => {
                        let def = self
                            .env
                            .functions
                            .get(&call.name)
                            .ok_or_else(|| CompileError::UnknownFunction(call.name.clone()))?;
                        if clause == Clause::Where && def.kind == FunctionKind::Aggregate {
                            return Err(CompileError::AggregateInWhere(call.name.clone()));
                        }
                        if clause == Clause::Having && def.kind != FunctionKind::Aggregate {
                            return Err(CompileError::NonAggregateHaving(call.name.clone()));
                        }
                        let mut qualified_call = call.clone();
                        for arg in qualified_call.field_args_mut() {
                            if let QualifiedField::Path(p) =
                                self.qualify_field(arg, clause)?
                            {
                                *arg = p;
                            }
                        }
                        ComparisonTarget::Function(qualified_call)
                    }
                };
                if let ComparisonValue::SubQuery(sub) = &cmp.value {
                    let prepared = Normalizer::run(self.env, sub, &self.aliases, None)?;
                    if prepared.select.len() != 1 {
                        return Err(CompileError::MalformedQuery(
                            "condition subquery must select exactly one column".into(),
                        ));
                    }
                    self.condition_subqueries.push(prepared);
                    cmp.value = ComparisonValue::SubQueryRef(self.condition_subqueries.len() - 1);
                }
                Ok(Condition::Comparison(cmp))
            }
        }
    }

    fn normalize_children(
        &mut self,
        children: &[Condition],
        clause: Clause,
    ) -> CompileResult<Vec<Condition>> {
        children
            .iter()
            .map(|c| self.normalize_condition(c, clause))
            .collect()
    }

    fn normalize_group_by(&mut self, group_by: &[String]) -> CompileResult<Vec<String>> {
        let mut out = Vec::with_capacity(group_by.len());
        for name in group_by {
            let path = FieldPath::parse(name);
            let qualified = match self.qualify_field(&path, Clause::GroupBy)? {
                QualifiedField::Path(p) => p,
                QualifiedField::ProjectedAlias(name) => {
                    return Err(CompileError::MalformedQuery(format!(
                        "cannot group by projection alias {}",
                        name
                    )))
                }
            };
            let relative = qualified
                .strip_prefix(&self.primary_segments)
                .filter(|p| !p.segments.is_empty())
                .unwrap_or(qualified);
            out.push(relative.dotted());
        }
        Ok(out)
    }

    fn normalize_order_by(&mut self, order_by: &[SortKey]) -> CompileResult<Vec<SortKey>> {
        let mut out = Vec::with_capacity(order_by.len());
        for key in order_by {
            let path = match self.qualify_field(&key.path, Clause::OrderBy)? {
                QualifiedField::Path(qualified) => qualified
                    .strip_prefix(&self.primary_segments)
                    .filter(|p| !p.segments.is_empty())
                    .unwrap_or(qualified),
                QualifiedField::ProjectedAlias(name) => FieldPath::new(vec![name]),
            };
            out.push(SortKey {
                path,
                direction: key.direction,
                nulls: key.nulls,
            });
        }
        Ok(out)
    }

    /// Builds per-binding field registries by walking the normalized
    /// clauses once each, then orders bindings by dependency.
    fn build_bindings(&mut self, prepared: &mut PreparedQuery) -> CompileResult<()> {
        let mut bindings: Vec<Binding> = Vec::with_capacity(self.from_entries.len());
        for (path, alias) in &self.from_entries {
            let node = self
                .tree
                .node(path)
                .cloned()
                .ok_or_else(|| CompileError::UnknownSource(path.clone()))?;
            bindings.push(Binding::from_node(&node, alias.clone()));
        }

        let register =
            |bindings: &mut Vec<Binding>, path: &FieldPath, pick: fn(&mut FieldRegistry) -> &mut BTreeSet<String>| {
                if path.segments.len() < 2 {
                    return;
                }
                let parent = path.parent_dotted();
                if let Some(binding) = bindings
                    .iter_mut()
                    .find(|b| b.path.eq_ignore_ascii_case(&parent))
                {
                    pick(&mut binding.fields).insert(path.field_name().to_string());
                }
            };

        for item in &prepared.select {
            if let CompiledSelectItem::Field { path, .. } = item {
                register(&mut bindings, path, |r| &mut r.select);
            }
        }
        for cond in &prepared.where_list {
            cond.visit_comparisons(&mut |cmp| match &cmp.target {
                ComparisonTarget::Field(path) => register(&mut bindings, path, |r| &mut r.filter),
                ComparisonTarget::Function(call) => {
                    for arg in call.field_args() {
                        register(&mut bindings, arg, |r| &mut r.filter);
                    }
                }
            });
        }
        for cond in &prepared.having_list {
            cond.visit_comparisons(&mut |cmp| match &cmp.target {
                ComparisonTarget::Field(path) => register(&mut bindings, path, |r| &mut r.having),
                ComparisonTarget::Function(call) => {
                    for arg in call.field_args() {
                        register(&mut bindings, arg, |r| &mut r.having);
                    }
                }
            });
        }
        for name in &prepared.group_by {
            let mut segments = self.primary_segments.clone();
            segments.extend(name.split('.').map(String::from));
            register(&mut bindings, &FieldPath::new(segments), |r| &mut r.group);
        }
        for key in &prepared.order_by {
            if key.path.segments.len() == 1
                && self
                    .function_aliases
                    .contains(&key.path.segments[0].to_ascii_lowercase())
            {
                continue;
            }
            let mut segments = self.primary_segments.clone();
            segments.extend(key.path.segments.iter().cloned());
            register(&mut bindings, &FieldPath::new(segments), |r| &mut r.sort);
        }
        // Select-function arguments are fetched but not themselves output,
        // so they land in the filter registry and get stripped afterwards.
        for item in &prepared.select {
            if let CompiledSelectItem::Function { call, .. } = item {
                for arg in call.field_args() {
                    let mut segments = self.primary_segments.clone();
                    segments.extend(arg.segments.iter().cloned());
                    register(&mut bindings, &FieldPath::new(segments), |r| &mut r.filter);
                }
            }
        }

        // Relationship-key needs: the detail side of every edge fetches
        // its foreign key, and parents of detail fan-outs their id field.
        let edges: Vec<(Option<String>, Option<JoinDirection>, Option<String>, String)> = bindings
            .iter()
            .map(|b| {
                (
                    b.parent_path.clone(),
                    b.direction,
                    b.foreign_key.clone(),
                    b.path.clone(),
                )
            })
            .collect();
        for (parent_path, direction, foreign_key, path) in edges {
            let (Some(parent_path), Some(direction), Some(foreign_key)) =
                (parent_path, direction, foreign_key)
            else {
                continue;
            };
            match direction {
                JoinDirection::Master => {
                    if let Some(parent) = bindings
                        .iter_mut()
                        .find(|b| b.path.eq_ignore_ascii_case(&parent_path))
                    {
                        parent.fields.relation.insert(foreign_key);
                    }
                }
                JoinDirection::Detail => {
                    if let Some(child) = bindings
                        .iter_mut()
                        .find(|b| b.path.eq_ignore_ascii_case(&path))
                    {
                        child.fields.relation.insert(foreign_key);
                    }
                }
            }
        }
        for sub in &prepared.select_subqueries {
            if let Some(parent) = bindings
                .iter_mut()
                .find(|b| b.path.eq_ignore_ascii_case(&sub.parent_path))
            {
                parent.fields.relation.insert(sub.parent_id_field.clone());
            }
        }

        // Dependency order: primary stays first, the rest by ascending
        // path length (shallower joins resolve before deeper ones).
        let primary = bindings.remove(0);
        bindings.sort_by_key(Binding::depth);
        // Detail traversal at the root level would fan one row out into
        // many; that shape is only reachable through a subquery select.
        if let Some(detail) = bindings
            .iter()
            .find(|b| b.direction == Some(JoinDirection::Detail))
        {
            return Err(CompileError::MalformedQuery(format!(
                "details relationship {} requires a subquery select",
                detail.path
            )));
        }
        bindings.insert(0, primary);
        prepared.bindings = bindings;
        Ok(())
    }
}

/// Expands a leading alias segment iteratively, bounded to prevent
/// alias cycles.
fn expand_alias_prefix(
    aliases: &HashMap<String, String>,
    dotted: &str,
) -> CompileResult<String> {
    let mut current = dotted.to_string();
    for _ in 0..MAX_ALIAS_EXPANSIONS {
        let mut segments = current.split('.');
        let first = segments.next().unwrap_or("");
        match aliases.get(&first.to_ascii_lowercase()) {
            Some(expansion) if !expansion.eq_ignore_ascii_case(&current) => {
                let rest: Vec<&str> = segments.collect();
                current = if rest.is_empty() {
                    expansion.clone()
                } else {
                    format!("{}.{}", expansion, rest.join("."))
                };
            }
            _ => return Ok(current),
        }
    }
    Err(CompileError::AliasCycle(dotted.to_string()))
}

fn assign_node_ids(prepared: &mut PreparedQuery) {
    let mut counter = 0u32;
    let mut next = || {
        let id = NodeId(counter);
        counter += 1;
        id
    };
    for cond in &mut prepared.where_list {
        cond.renumber(&mut next);
    }
    for cond in &mut prepared.having_list {
        cond.renumber(&mut next);
    }
    prepared.node_count = counter;
}
