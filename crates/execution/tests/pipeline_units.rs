use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use quarry_common::{EngineConfig, QuarryError, QueryId, Result, TableId};
use quarry_execution::{execute_plan, Row, SharedTaskContext, TableProvider, TaskContext};
use quarry_planner::{
    Collation, Distribution, FieldCollation, JoinType, PlanBuilder, PlanNode, ScalarExpr,
    ScalarOp, TableRef, Value,
};

/// Serves `n` rows `(i, i % 3)` for any table.
struct Counting(i64);

impl TableProvider for Counting {
    fn rows(&self, _table: &TableRef) -> Result<Vec<Row>> {
        Ok((0..self.0)
            .map(|i| vec![Value::Int64(i), Value::Int64(i % 3)])
            .collect())
    }
}

fn shape() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("bucket", DataType::Int64, false),
    ]))
}

fn ctx(capacity: usize) -> SharedTaskContext {
    let config = EngineConfig {
        channel_capacity: capacity,
        ..EngineConfig::default()
    };
    Arc::new(TaskContext::new(QueryId(3), &config))
}

fn scan(b: &mut PlanBuilder) -> PlanNode {
    b.scan(TableRef::new(TableId(1), "t", "numbers"), shape()).unwrap()
}

async fn run(plan: &PlanNode, n: i64) -> Result<Vec<Row>> {
    execute_plan(plan, Arc::new(Counting(n)), ctx(4))?
        .collect_rows()
        .await
}

fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter().map(|r| r[0].as_i64().unwrap()).collect()
}

#[tokio::test]
async fn filter_project_pipeline() {
    let mut b = PlanBuilder::new();
    let input = scan(&mut b);
    let s = input.schema().clone();
    let pred = ScalarExpr::binary(
        ScalarOp::Eq,
        ScalarExpr::column(&s, 1).unwrap(),
        ScalarExpr::literal(Value::Int64(0)),
    )
    .unwrap();
    let filtered = b.filter(input, pred).unwrap();
    let doubled = ScalarExpr::binary(
        ScalarOp::Multiply,
        ScalarExpr::column(&s, 0).unwrap(),
        ScalarExpr::literal(Value::Int64(2)),
    )
    .unwrap();
    let plan = b.project(filtered, vec![(doubled, "twice".to_string())]).unwrap();
    let out = run(&plan, 10).await.unwrap();
    assert_eq!(ids(&out), vec![0, 6, 12, 18]);
}

#[tokio::test]
async fn sort_with_offset_and_fetch() {
    let mut b = PlanBuilder::new();
    let input = scan(&mut b);
    let collation = Collation(vec![FieldCollation::asc(1), FieldCollation::desc(0)]);
    let plan = b.sort(input, collation, Some(1), Some(3)).unwrap();
    let out = run(&plan, 7).await.unwrap();
    // bucket 0: 6, 3, 0 then bucket 1: 4, 1
    assert_eq!(ids(&out), vec![3, 0, 4]);
}

#[tokio::test]
async fn union_all_drains_inputs_in_order_through_exchange() {
    let mut b = PlanBuilder::new();
    let left = scan(&mut b);
    let right = b
        .values(shape(), vec![vec![Value::Int64(100), Value::Int64(1)]])
        .unwrap();
    let union = b.union(vec![left, right], true).unwrap();
    let plan = b.exchange(union, Distribution::singleton()).unwrap();
    let out = run(&plan, 3).await.unwrap();
    assert_eq!(ids(&out), vec![0, 1, 2, 100]);
}

#[tokio::test]
async fn joins_and_distinct_unions_are_rejected_at_build_time() {
    let mut b = PlanBuilder::new();
    let left = scan(&mut b);
    let right = scan(&mut b);
    let on = ScalarExpr::literal(Value::Boolean(true));
    let join = b.join(left, right, on, JoinType::Inner).unwrap();
    let err = execute_plan(&join, Arc::new(Counting(1)), ctx(4)).unwrap_err();
    assert!(matches!(err, QuarryError::Unsupported(_)));

    let mut b = PlanBuilder::new();
    let inputs = vec![scan(&mut b), scan(&mut b)];
    let distinct = b.union(inputs, false).unwrap();
    let err = execute_plan(&distinct, Arc::new(Counting(1)), ctx(4)).unwrap_err();
    assert!(matches!(err, QuarryError::Unsupported(_)));
}

#[tokio::test]
async fn runtime_errors_reach_the_consumer() {
    let mut b = PlanBuilder::new();
    let input = scan(&mut b);
    let s = input.schema().clone();
    let ratio = ScalarExpr::binary(
        ScalarOp::Divide,
        ScalarExpr::column(&s, 0).unwrap(),
        ScalarExpr::column(&s, 1).unwrap(),
    )
    .unwrap();
    let plan = b.project(input, vec![(ratio, "r".to_string())]).unwrap();
    // first row is (0, 0)
    let err = run(&plan, 5).await.unwrap_err();
    assert!(matches!(err, QuarryError::Execution(msg) if msg.contains("division by zero")));
}

#[tokio::test]
async fn cancelling_a_running_pipeline_is_observed_by_the_consumer() {
    let mut b = PlanBuilder::new();
    let input = scan(&mut b);
    let plan = b.exchange(input, Distribution::singleton()).unwrap();
    let ctx = ctx(1);
    let cancel = ctx.cancel.clone();
    let mut stream = execute_plan(&plan, Arc::new(Counting(1_000_000)), ctx).unwrap();

    let first = stream.next_row().await.unwrap().unwrap();
    assert_eq!(first[0], Value::Int64(0));
    cancel.cancel();
    let next = tokio::time::timeout(std::time::Duration::from_secs(5), stream.next_row())
        .await
        .expect("consumer must not hang after cancellation");
    assert!(matches!(next, Some(Err(QuarryError::Cancelled))));
}
