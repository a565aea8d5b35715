//! End-to-end pipeline behavior against a single source: filtering,
//! sorting, windowing, projection, and the resolver capability contract.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;

use fedquery::ast::{
    Atom, ComparisonOp, ComparisonTarget, ComparisonValue, Condition, FieldPath, FunctionArg,
    FunctionCall, ParamMap, ParamValue, Query, SelectItem, SortKey,
};
use fedquery::engine::{
    QueryResolver, ResolverCapabilities, ResolverContext, ResolverFuture, ResolverRequest,
};
use fedquery::executor::ExecuteError;
use fedquery::util::Record;
use fedquery::QueryEngine;

use common::{column, records, ClaimingResolver, FailingResolver, TableResolver};

fn contact_rows() -> Vec<serde_json::Value> {
    vec![
        json!({"Id": 1, "LastName": "Lovelace", "FirstName": "Ada", "Age": 36,
               "Email": "ada@example.com", "Tags": "eng;math"}),
        json!({"Id": 2, "LastName": "Hopper", "FirstName": "Grace", "Age": 85,
               "Email": null, "Tags": "eng;navy"}),
        json!({"Id": 3, "LastName": "Turing", "FirstName": "Alan", "Age": 41,
               "Tags": null}),
        json!({"Id": 4, "LastName": "Kay", "FirstName": "Alan", "Age": null,
               "Email": "kay@example.com", "Tags": "sales;ux"}),
    ]
}

fn contact_engine() -> QueryEngine {
    QueryEngine::builder()
        .resolver("contact", TableResolver::new(contact_rows()))
        .build()
}

#[tokio::test]
async fn test_select_strips_unrequested_fields() {
    let engine = contact_engine();
    let query = Query::from_source("Contact").select(SelectItem::field("LastName"));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();

    assert_eq!(rows.len(), 4);
    for row in &rows {
        let keys: Vec<&str> = row.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["LastName"]);
    }
    assert_eq!(
        column(&rows, "LastName"),
        vec![json!("Lovelace"), json!("Hopper"), json!("Turing"), json!("Kay")]
    );
}

#[tokio::test]
async fn test_engine_filters_when_resolver_claims_nothing() {
    // The resolver returns everything; the engine must filter anyway.
    let engine = contact_engine();
    let query = Query::from_source("Contact")
        .select(SelectItem::field("LastName"))
        .filter(Condition::field_cmp("Age", ComparisonOp::Gt, Atom::Number(40.0)));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();

    // Null ages never satisfy an ordered comparison.
    assert_eq!(column(&rows, "LastName"), vec![json!("Hopper"), json!("Turing")]);
}

#[tokio::test]
async fn test_eq_null_matches_null_and_missing() {
    let engine = contact_engine();
    let query = Query::from_source("Contact")
        .select(SelectItem::field("LastName"))
        .filter(Condition::field_cmp("Email", ComparisonOp::Eq, Atom::Null));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    assert_eq!(column(&rows, "LastName"), vec![json!("Hopper"), json!("Turing")]);

    let query = Query::from_source("Contact")
        .select(SelectItem::field("LastName"))
        .filter(Condition::field_cmp("Email", ComparisonOp::Ne, Atom::Null));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    assert_eq!(column(&rows, "LastName"), vec![json!("Lovelace"), json!("Kay")]);
}

#[tokio::test]
async fn test_like_matches_case_insensitively() {
    let engine = contact_engine();
    let query = Query::from_source("Contact")
        .select(SelectItem::field("LastName"))
        .filter(Condition::field_cmp("LastName", ComparisonOp::Like, Atom::text("%OVE%")));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    assert_eq!(column(&rows, "LastName"), vec![json!("Lovelace")]);
}

#[tokio::test]
async fn test_includes_and_excludes_over_multi_value_strings() {
    let engine = contact_engine();
    let query = Query::from_source("Contact")
        .select(SelectItem::field("LastName"))
        .filter(Condition::field_in(
            "Tags",
            ComparisonOp::Includes,
            vec![Atom::text("navy")],
        ));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    assert_eq!(column(&rows, "LastName"), vec![json!("Hopper")]);

    // A null left-hand side satisfies neither includes nor excludes.
    let query = Query::from_source("Contact")
        .select(SelectItem::field("LastName"))
        .filter(Condition::field_in(
            "Tags",
            ComparisonOp::Excludes,
            vec![Atom::text("eng")],
        ));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    assert_eq!(column(&rows, "LastName"), vec![json!("Kay")]);
}

#[tokio::test]
async fn test_sort_null_placement_per_key() {
    let engine = contact_engine();
    let query = Query::from_source("Contact")
        .select(SelectItem::field("LastName"))
        .order(SortKey::asc("Age"));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    // Default placement pushes the null age after every value.
    assert_eq!(
        column(&rows, "LastName"),
        vec![json!("Lovelace"), json!("Turing"), json!("Hopper"), json!("Kay")]
    );

    // Descending inverts the whole key, null placement included.
    let query = Query::from_source("Contact")
        .select(SelectItem::field("LastName"))
        .order(SortKey::desc("Age"));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    assert_eq!(
        column(&rows, "LastName"),
        vec![json!("Kay"), json!("Hopper"), json!("Turing"), json!("Lovelace")]
    );

    let query = Query::from_source("Contact")
        .select(SelectItem::field("LastName"))
        .order(SortKey::asc("Age").nulls_last());
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    assert_eq!(
        column(&rows, "LastName"),
        vec![json!("Kay"), json!("Lovelace"), json!("Turing"), json!("Hopper")]
    );
}

#[tokio::test]
async fn test_offset_and_limit_window_after_sort() {
    let engine = contact_engine();
    let query = Query::from_source("Contact")
        .select(SelectItem::field("LastName"))
        .order(SortKey::asc("LastName"))
        .offset(1)
        .limit(2);
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    assert_eq!(column(&rows, "LastName"), vec![json!("Kay"), json!("Lovelace")]);
}

#[tokio::test]
async fn test_params_resolve_into_in_lists() {
    let engine = contact_engine();
    let query = Query::from_source("Contact")
        .select(SelectItem::field("LastName"))
        .filter(Condition::cmp(
            ComparisonOp::In,
            ComparisonTarget::Field(FieldPath::parse("LastName")),
            ComparisonValue::Param("names".into()),
        ));
    let params: ParamMap = HashMap::from([(
        "names".to_string(),
        ParamValue::List(vec![Atom::text("Hopper"), Atom::text("Turing")]),
    )]);
    let rows = engine.query(&query, &params).await.unwrap();
    assert_eq!(column(&rows, "LastName"), vec![json!("Hopper"), json!("Turing")]);
}

#[tokio::test]
async fn test_field_alias_renames_output_column() {
    let engine = contact_engine();
    let query = Query::from_source("Contact")
        .select(SelectItem::field_as("LastName", "surname"))
        .filter(Condition::field_cmp("surname", ComparisonOp::Eq, Atom::text("Kay")));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();

    assert_eq!(rows.len(), 1);
    let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["surname"]);
    assert_eq!(rows[0]["surname"], json!("Kay"));
}

#[tokio::test]
async fn test_filter_on_projected_function_alias() {
    let resolver = TableResolver::new(contact_rows());
    let log = resolver.log.clone();
    let engine = QueryEngine::builder().resolver("contact", resolver).build();

    let full_name = FunctionCall::new(
        "concat",
        vec![
            FunctionArg::Field(FieldPath::parse("FirstName")),
            FunctionArg::Atom(Atom::text(" ")),
            FunctionArg::Field(FieldPath::parse("LastName")),
        ],
    );
    let query = Query::from_source("Contact")
        .select(SelectItem::function_as(full_name, "full_name"))
        .filter(Condition::field_cmp(
            "full_name",
            ComparisonOp::Eq,
            Atom::text("Ada Lovelace"),
        ));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["full_name"], json!("Ada Lovelace"));
    // Alias conditions only exist post-projection; none reach the
    // resolver.
    let seen = log.lock().unwrap();
    assert_eq!(seen[0].condition_count, 0);
}

#[tokio::test]
async fn test_single_source_window_offered_for_pushdown() {
    let resolver = TableResolver::new(contact_rows());
    let log = resolver.log.clone();
    let engine = QueryEngine::builder().resolver("contact", resolver).build();

    let query = Query::from_source("Contact")
        .select(SelectItem::field("LastName"))
        .order(SortKey::asc("LastName"))
        .limit(2)
        .offset(1);
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();

    let seen = log.lock().unwrap();
    assert_eq!(seen[0].limit, Some(2));
    assert_eq!(seen[0].offset, Some(1));
    assert_eq!(seen[0].order_key_count, 1);
    // The resolver claimed nothing, so the engine still windowed.
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_claimed_limit_is_trusted() {
    let caps = ResolverCapabilities {
        filtering: true,
        sorting: true,
        limit: true,
        offset: true,
    };
    let engine = QueryEngine::builder()
        .resolver("contact", ClaimingResolver::new(contact_rows(), caps))
        .build();
    let query = Query::from_source("Contact")
        .select(SelectItem::field("LastName"))
        .limit(1);
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    // The claim is trusted; no second truncation happens in-process.
    assert_eq!(rows.len(), 4);
}

#[tokio::test]
async fn test_claimed_filtering_skips_in_process_filter() {
    let caps = ResolverCapabilities {
        filtering: true,
        ..Default::default()
    };
    let engine = QueryEngine::builder()
        .resolver("contact", ClaimingResolver::new(contact_rows(), caps))
        .build();
    let query = Query::from_source("Contact")
        .select(SelectItem::field("LastName"))
        .filter(Condition::field_cmp("Age", ComparisonOp::Gt, Atom::Number(40.0)));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    // The claim is trusted verbatim; the resolver's rows stand.
    assert_eq!(rows.len(), 4);
}

#[tokio::test]
async fn test_filtering_claim_ignored_when_conditions_withheld() {
    // Alias conditions never reach the resolver, so its filtering claim
    // cannot cover them.
    let caps = ResolverCapabilities {
        filtering: true,
        ..Default::default()
    };
    let engine = QueryEngine::builder()
        .resolver("contact", ClaimingResolver::new(contact_rows(), caps))
        .build();
    let full_name = FunctionCall::new(
        "concat",
        vec![
            FunctionArg::Field(FieldPath::parse("FirstName")),
            FunctionArg::Atom(Atom::text(" ")),
            FunctionArg::Field(FieldPath::parse("LastName")),
        ],
    );
    let query = Query::from_source("Contact")
        .select(SelectItem::function_as(full_name, "full_name"))
        .filter(Condition::field_cmp(
            "full_name",
            ComparisonOp::Eq,
            Atom::text("Ada Lovelace"),
        ));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["full_name"], json!("Ada Lovelace"));
}

#[tokio::test]
async fn test_claimed_sorting_skips_in_process_sort() {
    let caps = ResolverCapabilities {
        sorting: true,
        ..Default::default()
    };
    let engine = QueryEngine::builder()
        .resolver("contact", ClaimingResolver::new(contact_rows(), caps))
        .build();
    let query = Query::from_source("Contact")
        .select(SelectItem::field("LastName"))
        .order(SortKey::asc("LastName"));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    // Resolver order preserved.
    assert_eq!(
        column(&rows, "LastName"),
        vec![json!("Lovelace"), json!("Hopper"), json!("Turing"), json!("Kay")]
    );
}

#[tokio::test]
async fn test_missing_resolver_is_an_error() {
    let engine = QueryEngine::builder().build();
    let query = Query::from_source("Contact").select(SelectItem::field("LastName"));
    let err = engine.query(&query, &ParamMap::new()).await.unwrap_err();
    assert!(matches!(err, ExecuteError::NoResolver(ref s) if s == "Contact"));
}

#[tokio::test]
async fn test_default_resolver_serves_unregistered_sources() {
    let engine = QueryEngine::builder()
        .default_resolver(TableResolver::new(contact_rows()))
        .build();
    let query = Query::from_source("Contact").select(SelectItem::field("LastName"));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    assert_eq!(rows.len(), 4);
}

struct ContextRecordingResolver {
    rows: Vec<Record>,
    user_data: Arc<Mutex<Option<serde_json::Value>>>,
}

impl QueryResolver for ContextRecordingResolver {
    fn query<'a>(
        &'a self,
        _req: ResolverRequest<'a>,
        ctx: &'a mut ResolverContext,
    ) -> ResolverFuture<'a> {
        *self.user_data.lock().unwrap() = ctx.user_data.clone();
        Box::pin(async move { Ok(self.rows.clone()) })
    }
}

#[tokio::test]
async fn test_user_data_reaches_the_resolver_context() {
    let seen = Arc::new(Mutex::new(None));
    let engine = QueryEngine::builder()
        .resolver(
            "contact",
            ContextRecordingResolver {
                rows: records(contact_rows()),
                user_data: seen.clone(),
            },
        )
        .build();
    let query = Query::from_source("Contact").select(SelectItem::field("LastName"));
    let prepared = engine.compile(&query).unwrap();
    let rows = engine
        .execute_with(&prepared, &ParamMap::new(), Some(json!({"tenant": "acme"})))
        .await
        .unwrap();

    assert_eq!(rows.len(), 4);
    assert_eq!(*seen.lock().unwrap(), Some(json!({"tenant": "acme"})));
}

#[tokio::test]
async fn test_resolver_failure_aborts_the_query() {
    let engine = QueryEngine::builder()
        .resolver("contact", FailingResolver)
        .build();
    let query = Query::from_source("Contact").select(SelectItem::field("LastName"));
    let err = engine.query(&query, &ParamMap::new()).await.unwrap_err();
    assert!(matches!(err, ExecuteError::Resolver { .. }));
    assert!(err.to_string().contains("backend down"));
}
