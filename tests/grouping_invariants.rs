//! Grouping, aggregation, and having-clause behavior.

mod common;

use serde_json::json;

use fedquery::ast::{
    Atom, ComparisonOp, ComparisonTarget, ComparisonValue, Condition, FieldPath, FunctionArg,
    FunctionCall, ParamMap, Query, SelectItem, SortKey,
};
use fedquery::compiler::CompileError;
use fedquery::engine::ResolverCapabilities;
use fedquery::executor::ExecuteError;
use fedquery::QueryEngine;

use common::{column, ClaimingResolver, TableResolver};

fn order_rows() -> Vec<serde_json::Value> {
    vec![
        json!({"Id": 1, "Region": "west", "Amount": 10}),
        json!({"Id": 2, "Region": "west", "Amount": 20}),
        json!({"Id": 3, "Region": "east", "Amount": 5}),
        json!({"Id": 4, "Region": "east", "Amount": null}),
        json!({"Id": 5, "Region": "west", "Amount": 30}),
        json!({"Id": 6, "Region": null, "Amount": 7}),
        json!({"Id": 7, "Region": null, "Amount": 8}),
    ]
}

fn order_engine() -> QueryEngine {
    QueryEngine::builder()
        .resolver("order", TableResolver::new(order_rows()))
        .build()
}

fn count() -> FunctionCall {
    FunctionCall::new("count", vec![])
}

fn sum_amount() -> FunctionCall {
    FunctionCall::new("sum", vec![FunctionArg::Field(FieldPath::parse("Amount"))])
}

#[tokio::test]
async fn test_group_by_with_count_and_sum() {
    let engine = order_engine();
    let query = Query::from_source("Order")
        .select(SelectItem::field("Region"))
        .select(SelectItem::function_as(count(), "cnt"))
        .select(SelectItem::function_as(sum_amount(), "total"))
        .group("Region");
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();

    // Groups come out in first-seen row order.
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0]["Region"], json!("west"));
    assert_eq!(rows[0]["cnt"], json!(3));
    assert_eq!(rows[0]["total"], json!(60.0));
    // Sum skips null members; count() counts rows.
    assert_eq!(rows[1]["Region"], json!("east"));
    assert_eq!(rows[1]["cnt"], json!(2));
    assert_eq!(rows[1]["total"], json!(5.0));
}

#[tokio::test]
async fn test_null_group_keys_never_merge() {
    let engine = order_engine();
    let query = Query::from_source("Order")
        .select(SelectItem::function_as(count(), "cnt"))
        .group("Region");
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();

    // The two null-region rows each form their own group.
    assert_eq!(rows.len(), 4);
    assert_eq!(column(&rows, "cnt"), vec![json!(3), json!(2), json!(1), json!(1)]);
}

#[tokio::test]
async fn test_having_filters_groups() {
    let engine = order_engine();
    let query = Query::from_source("Order")
        .select(SelectItem::field("Region"))
        .select(SelectItem::function_as(count(), "cnt"))
        .group("Region")
        .having(Condition::cmp(
            ComparisonOp::Gt,
            ComparisonTarget::Function(count()),
            ComparisonValue::Atom(Atom::Number(2.0)),
        ));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["Region"], json!("west"));
    assert_eq!(rows[0]["cnt"], json!(3));
}

#[tokio::test]
async fn test_having_on_non_group_field_is_rejected() {
    let engine = order_engine();
    let query = Query::from_source("Order")
        .select(SelectItem::field("Region"))
        .group("Region")
        .having(Condition::field_cmp(
            "Amount",
            ComparisonOp::Gt,
            Atom::Number(15.0),
        ));
    let err = engine.query(&query, &ParamMap::new()).await.unwrap_err();
    assert!(matches!(err, ExecuteError::Function(_)));
}

#[tokio::test]
async fn test_having_on_group_field_reads_group_value() {
    let engine = order_engine();
    let query = Query::from_source("Order")
        .select(SelectItem::field("Region"))
        .group("Region")
        .having(Condition::field_cmp(
            "Region",
            ComparisonOp::Eq,
            Atom::text("west"),
        ));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["Region"], json!("west"));
}

#[tokio::test]
async fn test_unoffered_window_claim_is_ignored() {
    // The window is never offered to a grouped fetch, so a resolver
    // claiming it anyway must not suppress the engine's own slicing.
    let caps = ResolverCapabilities {
        filtering: true,
        sorting: true,
        limit: true,
        offset: true,
    };
    let engine = QueryEngine::builder()
        .resolver("order", ClaimingResolver::new(order_rows(), caps))
        .build();
    let query = Query::from_source("Order")
        .select(SelectItem::field("Region"))
        .select(SelectItem::function_as(count(), "cnt"))
        .group("Region")
        .order(SortKey::desc("cnt"))
        .limit(1);
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["Region"], json!("west"));
    assert_eq!(rows[0]["cnt"], json!(3));
}

#[tokio::test]
async fn test_where_applies_before_grouping() {
    let engine = order_engine();
    let query = Query::from_source("Order")
        .select(SelectItem::field("Region"))
        .select(SelectItem::function_as(sum_amount(), "total"))
        .filter(Condition::field_cmp(
            "Amount",
            ComparisonOp::Ge,
            Atom::Number(8.0),
        ))
        .group("Region");
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();

    // East loses both rows; only one null-region row survives.
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["Region"], json!("west"));
    assert_eq!(rows[0]["total"], json!(60.0));
    assert_eq!(rows[1]["Region"], json!(null));
    assert_eq!(rows[1]["total"], json!(8.0));
}

#[tokio::test]
async fn test_groupless_aggregate_over_single_row() {
    let engine = order_engine();
    let query = Query::from_source("Order")
        .select(SelectItem::function_as(count(), "cnt"))
        .filter(Condition::field_cmp("Id", ComparisonOp::Eq, Atom::Number(1.0)));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();

    // Exactly one input row passes through as a single implicit group.
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["cnt"], json!(1));
}

#[tokio::test]
async fn test_groupless_aggregate_over_multiple_rows_is_rejected() {
    let engine = order_engine();
    let query = Query::from_source("Order").select(SelectItem::function_as(count(), "cnt"));
    let err = engine.query(&query, &ParamMap::new()).await.unwrap_err();
    assert!(matches!(err, ExecuteError::Grouping(_)));
}

#[tokio::test]
async fn test_aggregate_over_empty_input_yields_no_groups() {
    let engine = order_engine();
    let query = Query::from_source("Order")
        .select(SelectItem::function_as(count(), "cnt"))
        .filter(Condition::field_cmp(
            "Amount",
            ComparisonOp::Gt,
            Atom::Number(1000.0),
        ));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_grouped_output_sorts_by_function_alias() {
    let engine = order_engine();
    let query = Query::from_source("Order")
        .select(SelectItem::field("Region"))
        .select(SelectItem::function_as(sum_amount(), "total"))
        .group("Region")
        .order(SortKey::desc("total"));
    let rows = engine.query(&query, &ParamMap::new()).await.unwrap();

    assert_eq!(
        column(&rows, "total"),
        vec![json!(60.0), json!(8.0), json!(7.0), json!(5.0)]
    );
}

#[tokio::test]
async fn test_ungrouped_select_field_is_rejected() {
    let engine = order_engine();
    let query = Query::from_source("Order")
        .select(SelectItem::field("Amount"))
        .group("Region");
    let err = engine.query(&query, &ParamMap::new()).await.unwrap_err();
    assert!(matches!(err, ExecuteError::Function(_)));
}

#[tokio::test]
async fn test_aggregate_in_where_is_rejected() {
    let engine = order_engine();
    let query = Query::from_source("Order")
        .select(SelectItem::field("Region"))
        .filter(Condition::cmp(
            ComparisonOp::Gt,
            ComparisonTarget::Function(count()),
            ComparisonValue::Atom(Atom::Number(1.0)),
        ));
    assert!(matches!(
        engine.compile(&query).unwrap_err(),
        CompileError::AggregateInWhere(_)
    ));
}

#[tokio::test]
async fn test_non_aggregate_having_is_rejected() {
    let engine = order_engine();
    let concat = FunctionCall::new(
        "concat",
        vec![FunctionArg::Field(FieldPath::parse("Region"))],
    );
    let query = Query::from_source("Order")
        .select(SelectItem::field("Region"))
        .group("Region")
        .having(Condition::cmp(
            ComparisonOp::Eq,
            ComparisonTarget::Function(concat),
            ComparisonValue::Atom(Atom::text("west")),
        ));
    assert!(matches!(
        engine.compile(&query).unwrap_err(),
        CompileError::NonAggregateHaving(_)
    ));
}
