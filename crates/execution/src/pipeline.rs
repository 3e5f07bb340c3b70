//! Turns an operator plan into connected execution units.

use std::sync::Arc;

use quarry_common::{QuarryError, Result};
use quarry_planner::{Operator, PlanNode};
use tracing::{debug, info};

use crate::context::SharedTaskContext;
use crate::exec_node::ExecNodeRef;
use crate::expressions::compile_expr;
use crate::operators::{
    check_output_width, AggregateExec, ExchangeExec, FilterExec, ProjectExec, ScanExec, SortExec,
    UnionExec, ValuesExec,
};
use crate::provider::TableProvider;
use crate::stream::{Row, RowStream};

/// Build the unit tree for `plan` without starting it.
///
/// `Join`, `Intersect`, `Minus`, distinct `Union` and unknown operators are
/// rejected with `Unsupported`.
pub fn build_exec(
    plan: &PlanNode,
    provider: &Arc<dyn TableProvider>,
    ctx: &SharedTaskContext,
) -> Result<ExecNodeRef> {
    let node: ExecNodeRef = match plan.op() {
        Operator::Scan { table, row_shape } => Arc::new(ScanExec::new(
            table.clone(),
            row_shape.clone(),
            Arc::clone(provider),
        )),
        Operator::Values { rows, row_shape } => Arc::new(ValuesExec::new(rows.clone(), row_shape.clone())),
        Operator::Filter { input, predicate } => {
            let input = build_exec(input, provider, ctx)?;
            let predicate = compile_expr(predicate, input.schema().as_ref())?;
            Arc::new(FilterExec::new(input, predicate))
        }
        Operator::Project { input, exprs, .. } => {
            let input = build_exec(input, provider, ctx)?;
            let input_schema = input.schema();
            let exprs = exprs
                .iter()
                .map(|e| compile_expr(e, input_schema.as_ref()))
                .collect::<Result<Vec<_>>>()?;
            Arc::new(ProjectExec::new(input, exprs, plan.schema().clone()))
        }
        Operator::Aggregate {
            input,
            grouping_sets,
            calls,
            indicator,
        } => {
            check_output_width(plan.schema(), grouping_sets, calls.len(), *indicator)?;
            let input = build_exec(input, provider, ctx)?;
            Arc::new(AggregateExec::new(
                input,
                grouping_sets.clone(),
                calls,
                *indicator,
                plan.schema().clone(),
                ctx,
            )?)
        }
        Operator::Union { inputs, all: true } => {
            let inputs = inputs
                .iter()
                .map(|i| build_exec(i, provider, ctx))
                .collect::<Result<Vec<_>>>()?;
            Arc::new(UnionExec::new(inputs, plan.schema().clone()))
        }
        Operator::Sort {
            input,
            collation,
            offset,
            fetch,
        } => {
            let input = build_exec(input, provider, ctx)?;
            Arc::new(SortExec::new(input, collation.clone(), *offset, *fetch))
        }
        Operator::Exchange { input, .. } => Arc::new(ExchangeExec::new(build_exec(input, provider, ctx)?)),
        Operator::Union { all: false, .. }
        | Operator::Join { .. }
        | Operator::Intersect { .. }
        | Operator::Minus { .. }
        | Operator::Other { .. } => {
            return Err(QuarryError::Unsupported(format!(
                "{} {} cannot be executed by the pipeline interpreter",
                plan.kind(),
                plan.id()
            )))
        }
    };
    debug!(node = %plan.id(), unit = node.name(), "built execution unit");
    Ok(node)
}

/// Start `plan` and return the pull side of its root unit.
///
/// Must be called from within a tokio runtime.
pub fn execute_plan(
    plan: &PlanNode,
    provider: Arc<dyn TableProvider>,
    ctx: SharedTaskContext,
) -> Result<RowStream> {
    let root = build_exec(plan, &provider, &ctx)?;
    info!(query_id = %ctx.query_id, nodes = plan.node_count(), "starting pipeline");
    root.execute(ctx)
}

/// Run `plan` to completion, handing every row to `sink`.
///
/// Returns the number of rows delivered. A sink error cancels the pipeline
/// and is returned as is.
pub async fn run_to_sink<F>(
    plan: &PlanNode,
    provider: Arc<dyn TableProvider>,
    ctx: SharedTaskContext,
    mut sink: F,
) -> Result<usize>
where
    F: FnMut(Row) -> Result<()>,
{
    let cancel = ctx.cancel.clone();
    let mut stream = execute_plan(plan, provider, ctx)?;
    let mut delivered = 0usize;
    while let Some(row) = stream.next_row().await {
        if let Err(err) = row.and_then(&mut sink) {
            cancel.cancel();
            return Err(err);
        }
        delivered += 1;
    }
    Ok(delivered)
}
