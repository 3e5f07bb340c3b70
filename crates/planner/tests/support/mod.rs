#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use quarry_common::{ColumnId, QuarryError, Result, TableId};
use quarry_planner::{
    CatalogReader, ColumnSet, PlanBuilder, PlanNode, ScalarExpr, ScalarOp, TableDescriptor,
    TableRef, TableStatistics, Value,
};

pub struct TestCatalog {
    tables: HashMap<TableId, (TableDescriptor, Option<TableStatistics>)>,
}

impl CatalogReader for TestCatalog {
    fn table(&self, id: TableId) -> Result<TableDescriptor> {
        self.tables
            .get(&id)
            .map(|(d, _)| d.clone())
            .ok_or_else(|| QuarryError::Planning(format!("unknown table: {id}")))
    }

    fn table_statistics(&self, id: TableId) -> Result<Option<TableStatistics>> {
        Ok(self.tables.get(&id).and_then(|(_, s)| s.clone()))
    }
}

pub fn orders_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("customer", DataType::Int64, false),
        Field::new("amount", DataType::Float64, true),
        Field::new("region", DataType::Utf8, false),
    ]))
}

pub fn orders_table() -> TableRef {
    TableRef::new(TableId(1), "sales", "orders")
}

pub fn customers_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, false),
    ]))
}

pub fn customers_table() -> TableRef {
    TableRef::new(TableId(2), "sales", "customers")
}

/// `orders` (1000 rows, key `id`, 50 customers, partitioned by region) and
/// `customers` (no statistics, key `id`).
pub fn catalog() -> TestCatalog {
    let orders = TableDescriptor {
        table: orders_table(),
        column_ids: (10..14).map(ColumnId).collect(),
        schema: orders_schema(),
        partition_column: Some(ColumnId(13)),
        unique_keys: vec![ColumnSet::of(&[0])],
        collation: Default::default(),
        distribution: None,
    };
    let stats = TableStatistics {
        row_count: Some(1000.0),
        distinct_counts: HashMap::from([(1, 50.0), (3, 4.0)]),
        average_column_sizes: HashMap::from([(3, 6.0)]),
    };
    let customers = TableDescriptor {
        table: customers_table(),
        column_ids: vec![ColumnId(20), ColumnId(21)],
        schema: customers_schema(),
        partition_column: None,
        unique_keys: vec![ColumnSet::of(&[0])],
        collation: Default::default(),
        distribution: None,
    };
    TestCatalog {
        tables: HashMap::from([
            (TableId(1), (orders, Some(stats))),
            (TableId(2), (customers, None)),
        ]),
    }
}

pub fn col(schema: &Schema, i: usize) -> ScalarExpr {
    ScalarExpr::column(schema, i).unwrap()
}

pub fn cmp(op: ScalarOp, left: ScalarExpr, value: Value) -> ScalarExpr {
    ScalarExpr::binary(op, left, ScalarExpr::literal(value)).unwrap()
}

pub fn scan_orders(b: &mut PlanBuilder) -> PlanNode {
    b.scan(orders_table(), orders_schema()).unwrap()
}

pub fn scan_customers(b: &mut PlanBuilder) -> PlanNode {
    b.scan(customers_table(), customers_schema()).unwrap()
}
