use std::collections::HashMap;
use std::sync::RwLock;

use arrow::record_batch::RecordBatch;
use quarry_common::{QuarryError, Result, TableId};
use quarry_execution::{rows_from_batch, Row, TableProvider};
use quarry_planner::{TableRef, Value};
use tracing::debug;

use crate::catalog::{Catalog, ColumnType, TableDef};

/// Rows held in memory, per table id.
#[derive(Debug, Default)]
pub struct MemTableProvider {
    tables: RwLock<HashMap<TableId, Vec<Row>>>,
}

impl MemTableProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider preloaded with every table's inline `rows`.
    pub fn from_catalog(catalog: &Catalog) -> Result<Self> {
        let provider = Self::new();
        for table in catalog.tables() {
            provider.append_rows(table.id, inline_rows(table)?);
        }
        Ok(provider)
    }

    /// Appends rows to `table`.
    pub fn append_rows(&self, table: TableId, rows: Vec<Row>) {
        let mut tables = self.tables.write().unwrap_or_else(|p| p.into_inner());
        debug!(table = %table, rows = rows.len(), "appending rows");
        tables.entry(table).or_default().extend(rows);
    }

    /// Appends the rows of an Arrow record batch to `table`.
    pub fn append_batch(&self, table: TableId, batch: &RecordBatch) -> Result<()> {
        let rows = rows_from_batch(batch)?;
        self.append_rows(table, rows);
        Ok(())
    }

    pub fn row_count(&self, table: TableId) -> usize {
        self.tables
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&table)
            .map_or(0, Vec::len)
    }
}

impl TableProvider for MemTableProvider {
    /// Tables that never received rows are empty, not missing.
    fn rows(&self, table: &TableRef) -> Result<Vec<Row>> {
        Ok(self
            .tables
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&table.id)
            .cloned()
            .unwrap_or_default())
    }
}

/// A table definition's inline JSON rows, typed by its columns.
pub fn inline_rows(table: &TableDef) -> Result<Vec<Row>> {
    table
        .rows
        .iter()
        .enumerate()
        .map(|(i, r)| json_row(table, i, r))
        .collect()
}

fn json_row(table: &TableDef, index: usize, row: &[serde_json::Value]) -> Result<Row> {
    if row.len() != table.columns.len() {
        return Err(QuarryError::InvalidConfig(format!(
            "row {index} of {} has {} values, expected {}",
            table.qualified_name(),
            row.len(),
            table.columns.len()
        )));
    }
    row.iter()
        .zip(&table.columns)
        .map(|(v, c)| {
            let value = json_value(v, c.column_type).ok_or_else(|| {
                QuarryError::InvalidConfig(format!(
                    "row {index} of {}: {v} is not a valid {:?} for column '{}'",
                    table.qualified_name(),
                    c.column_type,
                    c.name
                ))
            })?;
            if value.is_null() && !c.nullable {
                return Err(QuarryError::InvalidConfig(format!(
                    "row {index} of {}: null in non-nullable column '{}'",
                    table.qualified_name(),
                    c.name
                )));
            }
            Ok(value)
        })
        .collect()
}

fn json_value(v: &serde_json::Value, ty: ColumnType) -> Option<Value> {
    use serde_json::Value as Json;
    if v.is_null() {
        return Some(Value::Null);
    }
    Some(match (ty, v) {
        (ColumnType::Boolean, Json::Bool(b)) => Value::Boolean(*b),
        (ColumnType::Int32, Json::Number(n)) => Value::Int32(i32::try_from(n.as_i64()?).ok()?),
        (ColumnType::Int64, Json::Number(n)) => Value::Int64(n.as_i64()?),
        (ColumnType::Float32, Json::Number(n)) => Value::Float32(n.as_f64()? as f32),
        (ColumnType::Float64, Json::Number(n)) => Value::Float64(n.as_f64()?),
        (ColumnType::Utf8, Json::String(s)) => Value::Utf8(s.clone()),
        _ => return None,
    })
}
