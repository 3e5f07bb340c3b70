use std::sync::Arc;

use quarry_catalog::{Catalog, MemTableProvider};
use quarry_common::{EngineConfig, QueryId, TableId};
use quarry_execution::{execute_plan, rows_to_batch, TaskContext};
use quarry_planner::{AggFunction, AggregateCall, CatalogReader, PlanBuilder, Value};

const CATALOG: &str = r#"[{
    "id": 1, "schema": "shop", "name": "sales",
    "columns": [
        {"id": 1, "name": "store", "type": "utf8", "nullable": false},
        {"id": 2, "name": "amount", "type": "int64"}
    ],
    "partition_column": "store"
}]"#;

#[tokio::test]
async fn record_batches_feed_a_grouped_aggregate() {
    let catalog = Catalog::from_json_str(CATALOG).unwrap();
    let table = catalog.get(TableId(1)).unwrap().clone();
    let schema = catalog.table(TableId(1)).unwrap().schema;

    let provider = MemTableProvider::new();
    for chunk in [
        vec![
            vec![Value::Utf8("north".into()), Value::Int64(3)],
            vec![Value::Utf8("south".into()), Value::Int64(4)],
        ],
        vec![vec![Value::Utf8("north".into()), Value::Null]],
    ] {
        let batch = rows_to_batch(schema.clone(), &chunk).unwrap();
        provider.append_batch(TableId(1), &batch).unwrap();
    }
    assert_eq!(provider.row_count(TableId(1)), 3);

    let mut b = PlanBuilder::new();
    let scan = b.scan(table.table_ref(), schema.clone()).unwrap();
    let calls = vec![
        AggregateCall::new(AggFunction::Count, vec![1], "n", &schema).unwrap(),
        AggregateCall::new(AggFunction::Max, vec![1], "top", &schema).unwrap(),
    ];
    let plan = b.group_by(scan, &[0], calls).unwrap();

    let ctx = Arc::new(TaskContext::new(QueryId(1), &EngineConfig::default()));
    let rows = execute_plan(&plan, Arc::new(provider), ctx)
        .unwrap()
        .collect_rows()
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![
            vec![Value::Utf8("north".into()), Value::Int64(1), Value::Int64(3)],
            vec![Value::Utf8("south".into()), Value::Int64(1), Value::Int64(4)],
        ]
    );
}
