use std::sync::Arc;

use arrow_schema::SchemaRef;
use quarry_common::Result;
use quarry_planner::Value;

use crate::context::SharedTaskContext;
use crate::exec_node::{spawn_unit, ExecNode, ExecNodeRef, UnitStats};
use crate::expressions::PhysicalExpr;
use crate::stream::RowStream;

/// Keeps rows whose predicate evaluates to `true`; `false` and null drop the row.
pub struct FilterExec {
    input: ExecNodeRef,
    predicate: Arc<dyn PhysicalExpr>,
}

impl FilterExec {
    /// Filter over `input`; `predicate` is compiled against the input's row shape.
    pub fn new(input: ExecNodeRef, predicate: Arc<dyn PhysicalExpr>) -> Self {
        Self { input, predicate }
    }
}

impl ExecNode for FilterExec {
    fn name(&self) -> &'static str {
        "Filter"
    }

    fn schema(&self) -> SchemaRef {
        self.input.schema()
    }

    fn execute(&self, ctx: SharedTaskContext) -> Result<RowStream> {
        let mut input = self.input.execute(Arc::clone(&ctx))?;
        let predicate = Arc::clone(&self.predicate);
        Ok(spawn_unit(ctx, self.name(), self.schema(), move |mut tx| async move {
            let mut stats = UnitStats::default();
            while let Some(row) = input.next_row().await {
                let row = row?;
                stats.rows_in += 1;
                if predicate.evaluate(&row)? == Value::Boolean(true) {
                    tx.send_row(row).await?;
                    stats.rows_out += 1;
                }
            }
            Ok(stats)
        }))
    }
}

/// Computes one output value per expression for every input row.
pub struct ProjectExec {
    input: ExecNodeRef,
    exprs: Arc<Vec<Arc<dyn PhysicalExpr>>>,
    schema: SchemaRef,
}

impl ProjectExec {
    /// Projection over `input` producing rows shaped like `schema`.
    pub fn new(input: ExecNodeRef, exprs: Vec<Arc<dyn PhysicalExpr>>, schema: SchemaRef) -> Self {
        Self {
            input,
            exprs: Arc::new(exprs),
            schema,
        }
    }
}

impl ExecNode for ProjectExec {
    fn name(&self) -> &'static str {
        "Project"
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn execute(&self, ctx: SharedTaskContext) -> Result<RowStream> {
        let mut input = self.input.execute(Arc::clone(&ctx))?;
        let exprs = Arc::clone(&self.exprs);
        Ok(spawn_unit(ctx, self.name(), self.schema(), move |mut tx| async move {
            let mut stats = UnitStats::default();
            while let Some(row) = input.next_row().await {
                let row = row?;
                stats.rows_in += 1;
                let out = exprs
                    .iter()
                    .map(|e| e.evaluate(&row))
                    .collect::<Result<Vec<_>>>()?;
                tx.send_row(out).await?;
                stats.rows_out += 1;
            }
            Ok(stats)
        }))
    }
}

/// Single-process exchange: rows pass through unchanged.
pub struct ExchangeExec {
    input: ExecNodeRef,
}

impl ExchangeExec {
    /// Pass-through over `input`.
    pub fn new(input: ExecNodeRef) -> Self {
        Self { input }
    }
}

impl ExecNode for ExchangeExec {
    fn name(&self) -> &'static str {
        "Exchange"
    }

    fn schema(&self) -> SchemaRef {
        self.input.schema()
    }

    fn execute(&self, ctx: SharedTaskContext) -> Result<RowStream> {
        let mut input = self.input.execute(Arc::clone(&ctx))?;
        Ok(spawn_unit(ctx, self.name(), self.schema(), move |mut tx| async move {
            let mut stats = UnitStats::default();
            while let Some(row) = input.next_row().await {
                tx.send_row(row?).await?;
                stats.rows_in += 1;
                stats.rows_out += 1;
            }
            Ok(stats)
        }))
    }
}

/// `UNION ALL`: drains each input to completion, in order.
pub struct UnionExec {
    inputs: Vec<ExecNodeRef>,
    schema: SchemaRef,
}

impl UnionExec {
    /// Union of `inputs`, which all share `schema`'s arity and types.
    pub fn new(inputs: Vec<ExecNodeRef>, schema: SchemaRef) -> Self {
        Self { inputs, schema }
    }
}

impl ExecNode for UnionExec {
    fn name(&self) -> &'static str {
        "Union"
    }

    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn execute(&self, ctx: SharedTaskContext) -> Result<RowStream> {
        let inputs = self
            .inputs
            .iter()
            .map(|i| i.execute(Arc::clone(&ctx)))
            .collect::<Result<Vec<_>>>()?;
        Ok(spawn_unit(ctx, self.name(), self.schema(), move |mut tx| async move {
            let mut stats = UnitStats::default();
            for mut input in inputs {
                while let Some(row) = input.next_row().await {
                    tx.send_row(row?).await?;
                    stats.rows_in += 1;
                    stats.rows_out += 1;
                }
            }
            Ok(stats)
        }))
    }
}
