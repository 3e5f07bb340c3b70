use std::sync::Arc;

use arrow_schema::SchemaRef;
use quarry_common::{QuarryError, Result};
use quarry_planner::TableRef;

use crate::context::SharedTaskContext;
use crate::exec_node::{spawn_unit, ExecNode, UnitStats};
use crate::provider::TableProvider;
use crate::stream::{Row, RowSender, RowStream};

/// Emits the rows a [`TableProvider`] returns for one table.
pub struct ScanExec {
    table: TableRef,
    schema: SchemaRef,
    provider: Arc<dyn TableProvider>,
}

impl ScanExec {
    /// Scan of `table` producing rows shaped like `schema`.
    pub fn new(table: TableRef, schema: SchemaRef, provider: Arc<dyn TableProvider>) -> Self {
        Self {
            table,
            schema,
            provider,
        }
    }
}

impl ExecNode for ScanExec {
    fn name(&self) -> &'static str {
        "Scan"
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn execute(&self, ctx: SharedTaskContext) -> Result<RowStream> {
        let rows = self.provider.rows(&self.table)?;
        let width = self.schema.fields().len();
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(QuarryError::Execution(format!(
                "table {} produced a row of {} values, expected {width}",
                self.table.qualified_name(),
                bad.len()
            )));
        }
        Ok(spawn_unit(ctx, self.name(), self.schema(), move |tx| emit_all(tx, rows)))
    }
}

/// Emits literal rows.
pub struct ValuesExec {
    rows: Arc<Vec<Row>>,
    schema: SchemaRef,
}

impl ValuesExec {
    /// Values unit over already validated `rows`.
    pub fn new(rows: Vec<Row>, schema: SchemaRef) -> Self {
        Self {
            rows: Arc::new(rows),
            schema,
        }
    }
}

impl ExecNode for ValuesExec {
    fn name(&self) -> &'static str {
        "Values"
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn execute(&self, ctx: SharedTaskContext) -> Result<RowStream> {
        let rows = self.rows.as_ref().clone();
        Ok(spawn_unit(ctx, self.name(), self.schema(), move |tx| emit_all(tx, rows)))
    }
}

async fn emit_all(mut tx: RowSender, rows: Vec<Row>) -> Result<UnitStats> {
    let mut stats = UnitStats::default();
    for row in rows {
        tx.send_row(row).await?;
        stats.rows_out += 1;
    }
    Ok(stats)
}
