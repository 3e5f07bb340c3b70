use std::collections::HashMap;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use quarry_common::{EngineConfig, QuarryError, QueryId, Result, TableId};
use quarry_execution::{
    execute_plan, run_to_sink, Row, SharedTaskContext, TableProvider, TaskContext, UdafRegistry,
    UserAggregate,
};
use quarry_planner::{
    AggFunction, AggregateCall, ColumnSet, PlanBuilder, PlanNode, SqlType, TableRef, Value,
};

struct Rows(HashMap<TableId, Vec<Row>>);

impl TableProvider for Rows {
    fn rows(&self, table: &TableRef) -> Result<Vec<Row>> {
        self.0
            .get(&table.id)
            .cloned()
            .ok_or_else(|| QuarryError::Execution(format!("no rows for {}", table.qualified_name())))
    }
}

fn ctx() -> SharedTaskContext {
    Arc::new(TaskContext::new(QueryId(7), &EngineConfig::default()))
}

fn schema(fields: &[(&str, DataType)]) -> SchemaRef {
    Arc::new(Schema::new(
        fields
            .iter()
            .map(|(n, t)| Field::new(*n, t.clone(), true))
            .collect::<Vec<_>>(),
    ))
}

fn int(v: Option<i64>) -> Value {
    v.map(Value::Int64).unwrap_or(Value::Null)
}

async fn run(plan: &PlanNode, rows: Vec<Row>) -> Result<Vec<Row>> {
    let mut tables = HashMap::new();
    tables.insert(TableId(1), rows);
    let stream = execute_plan(plan, Arc::new(Rows(tables)), ctx())?;
    stream.collect_rows().await
}

fn scan(b: &mut PlanBuilder, shape: SchemaRef) -> PlanNode {
    b.scan(TableRef::new(TableId(1), "t", "facts"), shape).unwrap()
}

#[tokio::test]
async fn count_skips_nulls_and_count_star_does_not() {
    let shape = schema(&[("a", DataType::Int64), ("b", DataType::Int64)]);
    let mut b = PlanBuilder::new();
    let input = scan(&mut b, shape.clone());
    let count_a = AggregateCall::new(AggFunction::Count, vec![0], "ca", &shape).unwrap();
    let count_star = AggregateCall::new(AggFunction::Count, vec![], "cs", &shape).unwrap();
    let plan = b.group_by(input, &[], vec![count_a, count_star]).unwrap();
    let rows = vec![
        vec![int(Some(1)), int(None)],
        vec![int(Some(2)), int(Some(3))],
        vec![int(None), int(Some(4))],
    ];
    let out = run(&plan, rows).await.unwrap();
    assert_eq!(out, vec![vec![Value::Int64(2), Value::Int64(3)]]);
}

#[tokio::test]
async fn sum0_and_sum_over_nulls() {
    let shape = schema(&[("v", DataType::Int64)]);
    let mut b = PlanBuilder::new();
    let input = scan(&mut b, shape.clone());
    let sum0 = AggregateCall::new(AggFunction::Sum0, vec![0], "z", &shape).unwrap();
    let sum = AggregateCall::new(AggFunction::Sum, vec![0], "s", &shape).unwrap();
    let plan = b.group_by(input, &[], vec![sum0, sum]).unwrap();

    let out = run(&plan, vec![vec![int(Some(5))], vec![int(None)], vec![int(Some(7))]])
        .await
        .unwrap();
    assert_eq!(out, vec![vec![Value::Int64(12), Value::Int64(12)]]);

    let out = run(&plan, vec![vec![int(None)], vec![int(None)]]).await.unwrap();
    assert_eq!(out, vec![vec![Value::Int64(0), Value::Null]]);
}

#[tokio::test]
async fn grouping_is_independent_of_input_order() {
    let shape = schema(&[("a", DataType::Int64), ("v", DataType::Int64)]);
    let mut b = PlanBuilder::new();
    let input = scan(&mut b, shape.clone());
    let sum = AggregateCall::new(AggFunction::Sum, vec![1], "s", &shape).unwrap();
    let plan = b.group_by(input, &[0], vec![sum]).unwrap();
    let rows = vec![
        vec![int(Some(1)), int(Some(10))],
        vec![int(Some(1)), int(Some(20))],
        vec![int(Some(2)), int(Some(5))],
    ];
    let mut reversed = rows.clone();
    reversed.reverse();

    for input in [rows, reversed] {
        let out = run(&plan, input).await.unwrap();
        let groups = out
            .into_iter()
            .map(|r| (r[0].clone(), r[1].clone()))
            .collect::<HashMap<_, _>>();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&Value::Int64(1)], Value::Int64(30));
        assert_eq!(groups[&Value::Int64(2)], Value::Int64(5));
    }
}

#[tokio::test]
async fn filtered_count() {
    let shape = schema(&[("v", DataType::Int64), ("keep", DataType::Boolean)]);
    let mut b = PlanBuilder::new();
    let input = scan(&mut b, shape.clone());
    let call = AggregateCall::new(AggFunction::Count, vec![0], "c", &shape)
        .unwrap()
        .with_filter(1);
    let plan = b.group_by(input, &[], vec![call]).unwrap();
    let rows = vec![
        vec![int(Some(1)), Value::Boolean(true)],
        vec![int(Some(2)), Value::Boolean(false)],
        vec![int(Some(3)), Value::Boolean(true)],
    ];
    assert_eq!(run(&plan, rows).await.unwrap(), vec![vec![Value::Int64(2)]]);
}

#[tokio::test]
async fn empty_grouping_set_over_empty_input_emits_one_row() {
    let shape = schema(&[("a", DataType::Int64), ("v", DataType::Int64)]);
    let mut b = PlanBuilder::new();
    let input = scan(&mut b, shape.clone());
    let calls = vec![
        AggregateCall::new(AggFunction::Count, vec![], "c", &shape).unwrap(),
        AggregateCall::new(AggFunction::Sum, vec![1], "s", &shape).unwrap(),
        AggregateCall::new(AggFunction::Sum0, vec![1], "z", &shape).unwrap(),
    ];
    let global = b.group_by(input, &[], calls.clone()).unwrap();
    assert_eq!(
        run(&global, vec![]).await.unwrap(),
        vec![vec![Value::Int64(0), Value::Null, Value::Int64(0)]]
    );

    let mut b = PlanBuilder::new();
    let input = scan(&mut b, shape.clone());
    let grouped = b.group_by(input, &[0], calls).unwrap();
    assert!(run(&grouped, vec![]).await.unwrap().is_empty());
}

#[tokio::test]
async fn grouping_sets_emit_nulls_and_indicators() {
    let shape = schema(&[("a", DataType::Int64), ("b", DataType::Int64), ("v", DataType::Int64)]);
    let mut b = PlanBuilder::new();
    let input = scan(&mut b, shape.clone());
    let sum = AggregateCall::new(AggFunction::Sum, vec![2], "s", &shape).unwrap();
    let plan = b
        .aggregate(
            input,
            vec![ColumnSet::of(&[0, 1]), ColumnSet::of(&[0]), ColumnSet::empty()],
            vec![sum],
            true,
        )
        .unwrap();
    let rows = vec![
        vec![int(Some(1)), int(Some(1)), int(Some(1))],
        vec![int(Some(1)), int(Some(2)), int(Some(2))],
        vec![int(Some(2)), int(Some(1)), int(Some(4))],
    ];
    let out = run(&plan, rows).await.unwrap();
    let t = Value::Boolean(true);
    let f = Value::Boolean(false);
    assert_eq!(
        out,
        vec![
            vec![int(Some(1)), int(Some(1)), t.clone(), t.clone(), int(Some(1))],
            vec![int(Some(1)), int(Some(2)), t.clone(), t.clone(), int(Some(2))],
            vec![int(Some(2)), int(Some(1)), t.clone(), t.clone(), int(Some(4))],
            vec![int(Some(1)), Value::Null, t.clone(), f.clone(), int(Some(3))],
            vec![int(Some(2)), Value::Null, t.clone(), f.clone(), int(Some(4))],
            vec![Value::Null, Value::Null, f.clone(), f, int(Some(7))],
        ]
    );
}

struct LongestString;

impl UserAggregate for LongestString {
    fn init(&mut self) -> Result<Value> {
        Ok(Value::Null)
    }

    fn add(&mut self, state: Value, value: &Value) -> Result<Value> {
        let keep = match (&state, value) {
            (Value::Utf8(s), Value::Utf8(v)) => s.len() >= v.len(),
            _ => false,
        };
        Ok(if keep { state } else { value.clone() })
    }

    fn merge(&mut self, left: Value, right: Value) -> Result<Value> {
        self.add(left, &right)
    }

    fn result(&mut self, state: Value) -> Result<Value> {
        Ok(state)
    }
}

#[tokio::test]
async fn user_defined_aggregate_from_context_registry() {
    let shape = schema(&[("g", DataType::Int64), ("s", DataType::Utf8)]);
    let udafs = Arc::new(UdafRegistry::default());
    udafs.register("longest", false, || Box::new(LongestString));
    let ctx = Arc::new(TaskContext::new(QueryId(8), &EngineConfig::default()).with_udafs(udafs));

    let mut b = PlanBuilder::new();
    let input = scan(&mut b, shape.clone());
    let call = AggregateCall::typed(
        AggFunction::from_name("LONGEST"),
        vec![1],
        "l",
        SqlType::utf8(true),
    );
    let plan = b.group_by(input, &[0], vec![call]).unwrap();
    let rows = vec![
        vec![int(Some(1)), Value::Utf8("ab".into())],
        vec![int(Some(1)), Value::Null],
        vec![int(Some(1)), Value::Utf8("abc".into())],
        vec![int(Some(2)), Value::Utf8("x".into())],
    ];
    let mut tables = HashMap::new();
    tables.insert(TableId(1), rows);
    let mut out = Vec::new();
    let n = run_to_sink(&plan, Arc::new(Rows(tables)), ctx, |row| {
        out.push(row);
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(n, 2);
    assert_eq!(
        out,
        vec![
            vec![int(Some(1)), Value::Utf8("abc".into())],
            vec![int(Some(2)), Value::Utf8("x".into())],
        ]
    );
}

#[tokio::test]
async fn sum_overflow_fails_the_execution() {
    let shape = schema(&[("v", DataType::Int64)]);
    let mut b = PlanBuilder::new();
    let input = scan(&mut b, shape.clone());
    let sum = AggregateCall::new(AggFunction::Sum, vec![0], "s", &shape).unwrap();
    let plan = b.group_by(input, &[], vec![sum]).unwrap();
    let err = run(&plan, vec![vec![int(Some(i64::MAX))], vec![int(Some(1))]])
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::Accumulator(_)));
}
