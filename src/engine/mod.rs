//! Engine assembly
//!
//! Wires the relationship graph, function table, per-source resolvers,
//! and lifecycle hooks into a `QueryEngine` that compiles and executes
//! queries.

mod hooks;
mod resolver;

pub use hooks::{ExecutionHooks, HookEvent, NoopHooks};
pub use resolver::{
    QueryResolver, ResolverCapabilities, ResolverContext, ResolverFuture, ResolverRequest,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use uuid::Uuid;

use crate::ast::{ParamMap, Query};
use crate::compiler::{
    compile, CompileResult, CompilerEnv, NamingRules, PreparedQuery, Relationship,
    RelationshipGraph,
};
use crate::executor::{run_query, ExecEnv, ExecuteResult};
use crate::functions::FunctionTable;
use crate::observability::Logger;
use crate::util::Record;

/// The write-side resolver tables. The query core registers and exposes
/// these but never invokes them; embedders that drive writes through the
/// same per-source registry look them up via
/// `QueryEngine::mutation_resolver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Insert,
    Update,
    Remove,
}

/// Builder for a `QueryEngine`.
#[derive(Default)]
pub struct QueryEngineBuilder {
    graph: RelationshipGraph,
    naming: Option<NamingRules>,
    functions: Option<FunctionTable>,
    resolvers: HashMap<String, Arc<dyn QueryResolver>>,
    mutations: HashMap<(MutationKind, String), Arc<dyn QueryResolver>>,
    default_resolver: Option<Arc<dyn QueryResolver>>,
    hooks: Option<Arc<dyn ExecutionHooks>>,
}

impl QueryEngineBuilder {
    /// Declares a relationship edge between sources.
    pub fn relate(mut self, source: &str, name: &str, rel: Relationship) -> Self {
        self.graph = self.graph.relate(source, name, rel);
        self
    }

    /// Overrides the default ID and foreign-key naming rules.
    pub fn naming(mut self, naming: NamingRules) -> Self {
        self.naming = Some(naming);
        self
    }

    /// Replaces the function table. Defaults to the builtin set.
    pub fn functions(mut self, table: FunctionTable) -> Self {
        self.functions = Some(table);
        self
    }

    /// Registers the resolver for one source, matched case-insensitively.
    pub fn resolver<R: QueryResolver + 'static>(mut self, source: &str, resolver: R) -> Self {
        self.resolvers
            .insert(source.to_ascii_lowercase(), Arc::new(resolver));
        self
    }

    /// Registers the insert resolver for one source.
    pub fn insert_resolver<R: QueryResolver + 'static>(self, source: &str, resolver: R) -> Self {
        self.mutation(MutationKind::Insert, source, resolver)
    }

    /// Registers the update resolver for one source.
    pub fn update_resolver<R: QueryResolver + 'static>(self, source: &str, resolver: R) -> Self {
        self.mutation(MutationKind::Update, source, resolver)
    }

    /// Registers the remove resolver for one source.
    pub fn remove_resolver<R: QueryResolver + 'static>(self, source: &str, resolver: R) -> Self {
        self.mutation(MutationKind::Remove, source, resolver)
    }

    fn mutation<R: QueryResolver + 'static>(
        mut self,
        kind: MutationKind,
        source: &str,
        resolver: R,
    ) -> Self {
        self.mutations
            .insert((kind, source.to_ascii_lowercase()), Arc::new(resolver));
        self
    }

    /// Registers the fallback resolver for sources without their own.
    pub fn default_resolver<R: QueryResolver + 'static>(mut self, resolver: R) -> Self {
        self.default_resolver = Some(Arc::new(resolver));
        self
    }

    /// Installs execution lifecycle hooks.
    pub fn hooks<H: ExecutionHooks + 'static>(mut self, hooks: H) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    pub fn build(self) -> QueryEngine {
        QueryEngine {
            graph: self.graph,
            naming: self.naming.unwrap_or_default(),
            functions: self.functions.unwrap_or_else(FunctionTable::with_builtins),
            resolvers: self.resolvers,
            mutations: self.mutations,
            default_resolver: self.default_resolver,
            hooks: self.hooks,
        }
    }
}

/// The federated query engine.
pub struct QueryEngine {
    graph: RelationshipGraph,
    naming: NamingRules,
    functions: FunctionTable,
    resolvers: HashMap<String, Arc<dyn QueryResolver>>,
    mutations: HashMap<(MutationKind, String), Arc<dyn QueryResolver>>,
    default_resolver: Option<Arc<dyn QueryResolver>>,
    hooks: Option<Arc<dyn ExecutionHooks>>,
}

impl QueryEngine {
    pub fn builder() -> QueryEngineBuilder {
        QueryEngineBuilder::default()
    }

    /// The configured function table.
    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// Looks up a registered write-side resolver. The query core never
    /// calls these itself.
    pub fn mutation_resolver(
        &self,
        kind: MutationKind,
        source: &str,
    ) -> Option<&Arc<dyn QueryResolver>> {
        self.mutations.get(&(kind, source.to_ascii_lowercase()))
    }

    /// Normalizes a query once; the result is reusable across
    /// executions.
    pub fn compile(&self, query: &Query) -> CompileResult<PreparedQuery> {
        let env = CompilerEnv {
            graph: &self.graph,
            naming: &self.naming,
            functions: &self.functions,
        };
        compile(&env, query)
    }

    /// Executes a prepared query with the given parameters.
    pub async fn execute(
        &self,
        prepared: &PreparedQuery,
        params: &ParamMap,
    ) -> ExecuteResult<Vec<Record>> {
        self.execute_with(prepared, params, None).await
    }

    /// Executes a prepared query, handing `user_data` to every resolver
    /// call of the execution through its context.
    pub async fn execute_with(
        &self,
        prepared: &PreparedQuery,
        params: &ParamMap,
        user_data: Option<Value>,
    ) -> ExecuteResult<Vec<Record>> {
        let execution_id = Uuid::new_v4();
        let id = execution_id.to_string();
        Logger::info(
            "QUERY_BEGIN",
            &[("execution_id", &id), ("primary", &prepared.primary_path)],
        );
        let started = Instant::now();

        let env = ExecEnv::new(
            &self.functions,
            &self.resolvers,
            self.default_resolver.as_ref(),
            self.hooks.as_deref(),
            execution_id,
            user_data,
            prepared.node_count,
        );
        let result = run_query(&env, prepared, params, None, None, true).await;

        let duration = started.elapsed().as_millis().to_string();
        match &result {
            Ok(rows) => Logger::info(
                "QUERY_END",
                &[
                    ("execution_id", &id),
                    ("status", "ok"),
                    ("duration_ms", &duration),
                    ("rows", &rows.len().to_string()),
                ],
            ),
            Err(err) => Logger::error(
                "QUERY_END",
                &[
                    ("execution_id", &id),
                    ("status", "error"),
                    ("duration_ms", &duration),
                    ("error", &err.to_string()),
                ],
            ),
        }
        result
    }

    /// Compiles and executes in one step.
    pub async fn query(&self, query: &Query, params: &ParamMap) -> ExecuteResult<Vec<Record>> {
        let prepared = self.compile(query)?;
        self.execute(&prepared, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SelectItem;
    use crate::compiler::CompileError;

    #[test]
    fn test_builder_compiles_against_graph() {
        let engine = QueryEngine::builder()
            .relate("Contact", "Account", Relationship::Master("Account".into()))
            .build();
        let query = Query::from_source("contact").select(SelectItem::field("account.Name"));
        let prepared = engine.compile(&query).unwrap();
        assert_eq!(prepared.primary_path, "Contact");
        assert_eq!(prepared.bindings[1].source, "Account");
    }

    struct NullResolver;

    impl QueryResolver for NullResolver {
        fn query<'a>(
            &'a self,
            _req: ResolverRequest<'a>,
            _ctx: &'a mut ResolverContext,
        ) -> ResolverFuture<'a> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    #[test]
    fn test_mutation_resolvers_registered_per_kind() {
        let engine = QueryEngine::builder()
            .insert_resolver("Contact", NullResolver)
            .update_resolver("Contact", NullResolver)
            .build();
        assert!(engine
            .mutation_resolver(MutationKind::Insert, "contact")
            .is_some());
        assert!(engine
            .mutation_resolver(MutationKind::Update, "CONTACT")
            .is_some());
        assert!(engine
            .mutation_resolver(MutationKind::Remove, "Contact")
            .is_none());
    }

    #[test]
    fn test_unknown_relationship_surfaces() {
        let engine = QueryEngine::builder().build();
        let query = Query::from_source("Contact").select(SelectItem::field("Account.Name"));
        assert!(matches!(
            engine.compile(&query).unwrap_err(),
            CompileError::UnknownRelationship { .. }
        ));
    }
}
