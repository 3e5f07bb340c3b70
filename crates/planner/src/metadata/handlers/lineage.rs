//! Column origins, expression lineage and table references.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use quarry_common::Result;

use super::{register_all, HandlerTable};
use crate::expr::{ScalarExpr, TableOccurrence};
use crate::metadata::kinds::{ColumnOrigin, MetadataArgs, MetadataKind as K, MetadataValue};
use crate::metadata::query::MetadataQuery;
use crate::plan::{group_set, Operator, OperatorKind as Op, PlanNode};

type Out = Result<Option<MetadataValue>>;

/// Upper bound on lineage expressions produced for one request.
const MAX_LINEAGE_COMBINATIONS: usize = 256;

pub(super) fn register(table: &mut HandlerTable) {
    table.register(Op::Scan, K::ColumnOrigin, Arc::new(scan_origins));
    table.register(Op::Values, K::ColumnOrigin, Arc::new(values_origins));
    register_all(
        table,
        &[Op::Filter, Op::Sort, Op::Exchange],
        K::ColumnOrigin,
        Arc::new(passthrough_origins),
    );
    table.register(Op::Project, K::ColumnOrigin, Arc::new(project_origins));
    table.register(Op::Aggregate, K::ColumnOrigin, Arc::new(aggregate_origins));
    table.register(Op::Join, K::ColumnOrigin, Arc::new(join_origins));
    register_all(
        table,
        &[Op::Union, Op::Intersect, Op::Minus],
        K::ColumnOrigin,
        Arc::new(set_op_origins),
    );

    table.register(Op::Scan, K::ExpressionLineage, Arc::new(scan_lineage));
    register_all(
        table,
        &[Op::Filter, Op::Sort, Op::Exchange],
        K::ExpressionLineage,
        Arc::new(passthrough_lineage),
    );
    table.register(Op::Project, K::ExpressionLineage, Arc::new(project_lineage));
    table.register(Op::Aggregate, K::ExpressionLineage, Arc::new(aggregate_lineage));
    table.register(Op::Join, K::ExpressionLineage, Arc::new(join_lineage));
    table.register(Op::Union, K::ExpressionLineage, Arc::new(union_lineage));

    table.register_fallback(K::TableReferences, Arc::new(default_table_references));
    table.register(Op::Scan, K::TableReferences, Arc::new(scan_table_references));
    table.register(Op::Values, K::TableReferences, Arc::new(|_: &MetadataQuery<'_>, _: &PlanNode, _: &MetadataArgs| {
        Ok(Some(MetadataValue::Tables(BTreeSet::new())))
    }));
}

fn column_arg(args: &MetadataArgs) -> Option<usize> {
    match args {
        MetadataArgs::Column(c) => Some(*c),
        _ => None,
    }
}

fn origins(set: BTreeSet<ColumnOrigin>) -> Option<MetadataValue> {
    Some(MetadataValue::Origins(set))
}

fn as_derived(set: BTreeSet<ColumnOrigin>) -> BTreeSet<ColumnOrigin> {
    set.into_iter()
        .map(|o| ColumnOrigin { derived: true, ..o })
        .collect()
}

fn scan_origins(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Some(column) = column_arg(args) else {
        return Ok(None);
    };
    if column >= node.schema().fields().len() {
        return Ok(None);
    }
    let Some(table) = mq.table_occurrence(node) else {
        return Ok(None);
    };
    Ok(origins(BTreeSet::from([ColumnOrigin {
        table: table.clone(),
        column,
        derived: false,
    }])))
}

fn values_origins(_: &MetadataQuery<'_>, _: &PlanNode, _: &MetadataArgs) -> Out {
    Ok(origins(BTreeSet::new()))
}

fn passthrough_origins(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Some(input), Some(column)) = (node.children().first().copied(), column_arg(args)) else {
        return Ok(None);
    };
    Ok(mq.column_origins(input, column)?.and_then(origins))
}

/// Derived origins of every input column `columns` reads.
fn derived_origins(
    mq: &MetadataQuery<'_>,
    input: &PlanNode,
    columns: impl IntoIterator<Item = usize>,
) -> Result<Option<BTreeSet<ColumnOrigin>>> {
    let mut out = BTreeSet::new();
    for c in columns {
        match mq.column_origins(input, c)? {
            Some(set) => out.extend(as_derived(set)),
            None => return Ok(None),
        }
    }
    Ok(Some(out))
}

fn project_origins(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Project { input, exprs, .. }, Some(column)) = (node.op(), column_arg(args)) else {
        return Ok(None);
    };
    let Some(expr) = exprs.get(column) else {
        return Ok(None);
    };
    match expr.as_input_ref() {
        Some(i) => Ok(mq.column_origins(input, i)?.and_then(origins)),
        None => Ok(derived_origins(mq, input, expr.referenced_inputs())?.and_then(origins)),
    }
}

fn aggregate_origins(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Aggregate {
        input,
        grouping_sets,
        calls,
        indicator,
    }, Some(column)) = (node.op(), column_arg(args))
    else {
        return Ok(None);
    };
    let groups = group_set(grouping_sets);
    if let Some(g) = groups.as_slice().get(column) {
        return Ok(mq.column_origins(input, *g)?.and_then(origins));
    }
    let mut offset = groups.len();
    if *indicator {
        if column < offset + groups.len() {
            return Ok(origins(BTreeSet::new()));
        }
        offset += groups.len();
    }
    let Some(call) = calls.get(column - offset) else {
        return Ok(None);
    };
    Ok(derived_origins(mq, input, call.args.iter().copied())?.and_then(origins))
}

fn join_origins(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Join { left, right, .. }, Some(column)) = (node.op(), column_arg(args)) else {
        return Ok(None);
    };
    let width = left.schema().fields().len();
    if column < width {
        Ok(mq.column_origins(left, column)?.and_then(origins))
    } else {
        Ok(mq.column_origins(right, column - width)?.and_then(origins))
    }
}

fn set_op_origins(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Some(column) = column_arg(args) else {
        return Ok(None);
    };
    let mut out = BTreeSet::new();
    for input in node.children() {
        match mq.column_origins(input, column)? {
            Some(set) => out.extend(set),
            None => return Ok(None),
        }
    }
    Ok(origins(out))
}

fn expr_arg(args: &MetadataArgs) -> Option<&ScalarExpr> {
    match args {
        MetadataArgs::Expr(e) => Some(e),
        _ => None,
    }
}

fn expressions(exprs: Vec<ScalarExpr>) -> Option<MetadataValue> {
    Some(MetadataValue::Expressions(exprs))
}

fn scan_lineage(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Some(expr), Some(table)) = (expr_arg(args), mq.table_occurrence(node)) else {
        return Ok(None);
    };
    let width = node.schema().fields().len();
    if expr.referenced_inputs().iter().any(|c| *c >= width) {
        return Ok(None);
    }
    let traced = expr.map_input_refs(&mut |column, ty| {
        Ok(ScalarExpr::TableInputRef {
            table: table.clone(),
            column,
            ty: ty.clone(),
        })
    })?;
    Ok(expressions(vec![traced]))
}

fn passthrough_lineage(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Some(input), Some(expr)) = (node.children().first().copied(), expr_arg(args)) else {
        return Ok(None);
    };
    Ok(mq.expression_lineage(input, expr)?.and_then(expressions))
}

fn project_lineage(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Project { input, exprs, .. }, Some(expr)) = (node.op(), expr_arg(args)) else {
        return Ok(None);
    };
    if expr.referenced_inputs().iter().any(|c| *c >= exprs.len()) {
        return Ok(None);
    }
    let pushed = expr.map_input_refs(&mut |i, _| Ok(exprs[i].clone()))?;
    Ok(mq.expression_lineage(input, &pushed)?.and_then(expressions))
}

fn aggregate_lineage(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Aggregate {
        input,
        grouping_sets,
        ..
    }, Some(expr)) = (node.op(), expr_arg(args))
    else {
        return Ok(None);
    };
    let groups = group_set(grouping_sets);
    if expr.referenced_inputs().iter().any(|c| *c >= groups.len()) {
        return Ok(None);
    }
    let pushed = expr.map_input_refs(&mut |i, ty| {
        Ok(ScalarExpr::input_ref(groups.as_slice()[i], ty.clone()))
    })?;
    Ok(mq.expression_lineage(input, &pushed)?.and_then(expressions))
}

fn join_lineage(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Join { left, right, .. }, Some(expr)) = (node.op(), expr_arg(args)) else {
        return Ok(None);
    };
    let width = left.schema().fields().len();
    let mut per_column: BTreeMap<usize, Vec<ScalarExpr>> = BTreeMap::new();
    let mut types = BTreeMap::new();
    expr.map_input_refs(&mut |i, ty| {
        types.insert(i, ty.clone());
        Ok(ScalarExpr::input_ref(i, ty.clone()))
    })?;
    for (column, ty) in types {
        let (side, local) = if column < width {
            (&**left, column)
        } else {
            (&**right, column - width)
        };
        match mq.expression_lineage(side, &ScalarExpr::input_ref(local, ty))? {
            Some(list) if !list.is_empty() => {
                per_column.insert(column, list);
            }
            _ => return Ok(None),
        }
    }
    let combinations: usize = per_column.values().map(Vec::len).product();
    if combinations > MAX_LINEAGE_COMBINATIONS {
        return Ok(None);
    }
    let mut out = Vec::with_capacity(combinations);
    let columns: Vec<usize> = per_column.keys().copied().collect();
    for n in 0..combinations {
        // Mixed-radix decode of `n` picks one lineage entry per column.
        let mut rest = n;
        let mut choice = BTreeMap::new();
        for c in &columns {
            let options = &per_column[c];
            choice.insert(*c, &options[rest % options.len()]);
            rest /= options.len();
        }
        out.push(expr.map_input_refs(&mut |i, ty| {
            Ok(choice
                .get(&i)
                .map(|e| (*e).clone())
                .unwrap_or_else(|| ScalarExpr::input_ref(i, ty.clone())))
        })?);
    }
    Ok(expressions(out))
}

fn union_lineage(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Some(expr) = expr_arg(args) else {
        return Ok(None);
    };
    let mut out = Vec::new();
    for input in node.children() {
        match mq.expression_lineage(input, expr)? {
            Some(list) => {
                for e in list {
                    if !out.contains(&e) {
                        out.push(e);
                    }
                }
            }
            None => return Ok(None),
        }
    }
    if out.len() > MAX_LINEAGE_COMBINATIONS {
        return Ok(None);
    }
    Ok(expressions(out))
}

fn tables(set: BTreeSet<TableOccurrence>) -> Option<MetadataValue> {
    Some(MetadataValue::Tables(set))
}

fn scan_table_references(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    Ok(mq
        .table_occurrence(node)
        .map(|t| BTreeSet::from([t.clone()]))
        .and_then(tables))
}

fn default_table_references(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let mut out = BTreeSet::new();
    for child in node.children() {
        match mq.table_references(child)? {
            Some(set) => out.extend(set),
            None => return Ok(None),
        }
    }
    Ok(tables(out))
}
