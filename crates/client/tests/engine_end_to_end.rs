use quarry_catalog::TableDef;
use quarry_client::Engine;
use quarry_common::{EngineConfig, QuarryError, Result, TableId};
use quarry_execution::UserAggregate;
use quarry_planner::{
    AggFunction, AggregateCall, CatalogReader, PlanBuilder, PlanNode, ScalarExpr, ScalarOp, SqlType,
    Value,
};

const SALES: &str = r#"{
    "id": 1, "schema": "shop", "name": "sales",
    "columns": [
        {"id": 1, "name": "store", "type": "utf8", "nullable": false},
        {"id": 2, "name": "amount", "type": "int64"}
    ],
    "partition_column": "store",
    "statistics": {"row_count": 4, "distinct_counts": {"store": 2}},
    "rows": [["north", 3], ["south", 4], ["north", null], ["north", 5]]
}"#;

fn engine() -> Engine {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let table: TableDef = serde_json::from_str(SALES).unwrap();
    engine.register_table(table).unwrap();
    engine
}

/// `SELECT store, SUM(amount) FROM shop.sales WHERE store = 'north' GROUP BY store`
fn north_totals() -> PlanNode {
    let table: TableDef = serde_json::from_str(SALES).unwrap();
    let schema = table.arrow_schema();
    let mut b = PlanBuilder::new();
    let scan = b.scan(table.table_ref(), schema.clone()).unwrap();
    let pred = ScalarExpr::binary(
        ScalarOp::Eq,
        ScalarExpr::column(&schema, 0).unwrap(),
        ScalarExpr::literal(Value::Utf8("north".into())),
    )
    .unwrap();
    let filter = b.filter(scan, pred).unwrap();
    let sum = AggregateCall::new(AggFunction::Sum, vec![1], "total", &schema).unwrap();
    b.group_by(filter, &[0], vec![sum]).unwrap()
}

#[tokio::test]
async fn runs_a_filtered_aggregate_over_inline_rows() {
    let engine = engine();
    let plan = north_totals();
    let rows = engine.collect(&plan).await.unwrap();
    assert_eq!(rows, vec![vec![Value::Utf8("north".into()), Value::Int64(8)]]);

    let batch = engine.collect_batch(&plan).await.unwrap();
    assert_eq!(batch.num_rows(), 1);
    assert_eq!(batch.schema().field(1).name(), "total");
}

#[test]
fn analysis_reports_partition_values_and_signature() {
    let engine = engine();
    let plan = north_totals();
    let shape = engine.analyze(&plan);
    let values = shape.partition_values().values().next().unwrap();
    assert_eq!(values.iter().collect::<Vec<_>>(), vec!["north"]);
    assert_eq!(shape.tables(), ["shop.sales".to_string()]);
    assert!(!shape.query_name().contains("north"));
}

#[test]
fn metadata_annotations_cover_every_node() {
    let engine = engine();
    let plan = north_totals();
    let text = engine.explain_with_metadata(&plan).unwrap();
    // Aggregate calls render on their own line below the aggregate node.
    let node_lines = text.lines().filter(|l| !l.contains(":=")).collect::<Vec<_>>();
    assert_eq!(text.lines().count(), 4, "{text}");
    assert_eq!(node_lines.len(), 3, "{text}");
    assert!(node_lines.iter().all(|l| l.contains("rows=")), "{text}");
    assert!(node_lines[2].trim_start().starts_with("Scan"), "{text}");
    assert!(node_lines[2].contains("rows=4"), "{text}");
}

#[test]
fn catalog_rejects_inline_rows_of_the_wrong_width() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let mut table: TableDef = serde_json::from_str(SALES).unwrap();
    table.rows.push(vec![serde_json::json!("east")]);
    assert!(matches!(
        engine.register_table(table),
        Err(QuarryError::InvalidConfig(_))
    ));
    assert!(engine.list_tables().is_empty());
}

struct Median(Vec<i64>);

impl UserAggregate for Median {
    fn init(&mut self) -> Result<Value> {
        self.0.clear();
        Ok(Value::Null)
    }

    fn add(&mut self, state: Value, value: &Value) -> Result<Value> {
        if let Some(v) = value.as_i64() {
            self.0.push(v);
        }
        Ok(state)
    }

    fn merge(&mut self, left: Value, _right: Value) -> Result<Value> {
        Ok(left)
    }

    fn result(&mut self, _state: Value) -> Result<Value> {
        self.0.sort_unstable();
        Ok(self
            .0
            .get(self.0.len() / 2)
            .map_or(Value::Null, |v| Value::Int64(*v)))
    }
}

#[tokio::test]
async fn engine_scoped_user_aggregates() {
    let engine = engine();
    assert!(!engine.register_udaf("median", true, || Box::new(Median(Vec::new()))));
    let table: TableDef = serde_json::from_str(SALES).unwrap();
    let schema = table.arrow_schema();
    let mut b = PlanBuilder::new();
    let scan = b.scan(table.table_ref(), schema).unwrap();
    let call = AggregateCall::typed(
        AggFunction::from_name("median"),
        vec![1],
        "m",
        SqlType::int64(true),
    );
    let plan = b.group_by(scan, &[], vec![call]).unwrap();
    assert_eq!(engine.collect(&plan).await.unwrap(), vec![vec![Value::Int64(4)]]);

    assert!(engine.deregister_udaf("MEDIAN"));
    assert!(matches!(engine.collect(&plan).await, Err(QuarryError::Planning(_))));
}

#[tokio::test]
async fn cancelled_context_stops_the_query() {
    let engine = engine();
    let plan = north_totals();
    let ctx = engine.task_context();
    ctx.cancel.cancel();
    let err = engine
        .execute_with(&plan, ctx)
        .unwrap()
        .collect_rows()
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::Cancelled));
}

#[test]
fn catalog_reader_view_uses_column_ordinals() {
    let mut catalog = quarry_catalog::Catalog::new();
    catalog
        .register_table(serde_json::from_str(SALES).unwrap())
        .unwrap();
    let stats = catalog.table_statistics(TableId(1)).unwrap().unwrap();
    assert_eq!(stats.distinct_counts.get(&0), Some(&2.0));
}
