//! Cost, size, memory and parallelism estimates.

use std::sync::Arc;

use arrow_schema::DataType;
use quarry_common::Result;

use super::{number, register_all, HandlerTable};
use crate::expr::ScalarExpr;
use crate::metadata::kinds::{Cost, MetadataArgs, MetadataKind as K, MetadataValue};
use crate::metadata::query::MetadataQuery;
use crate::plan::{group_set, AggFunction, Operator, OperatorKind as Op, PlanNode};
use crate::traits::DistributionKind;
use crate::types::Value;

type Out = Result<Option<MetadataValue>>;

const CPU_PER_FIELD_EXCHANGE: f64 = 4.0;
const CPU_PER_FIELD_SORT: f64 = 4.0;
const AGG_CALL_FACTOR: f64 = 0.125;
const AGG_SUM_FACTOR: f64 = 0.0125;

pub(super) fn register(table: &mut HandlerTable) {
    table.register_fallback(K::NonCumulativeCost, Arc::new(default_own_cost));
    table.register(Op::Scan, K::NonCumulativeCost, Arc::new(scan_own_cost));
    table.register(Op::Values, K::NonCumulativeCost, Arc::new(values_own_cost));
    table.register(Op::Filter, K::NonCumulativeCost, Arc::new(filter_own_cost));
    table.register(Op::Project, K::NonCumulativeCost, Arc::new(project_own_cost));
    table.register(Op::Aggregate, K::NonCumulativeCost, Arc::new(aggregate_own_cost));
    table.register(Op::Join, K::NonCumulativeCost, Arc::new(join_own_cost));
    table.register(Op::Sort, K::NonCumulativeCost, Arc::new(sort_own_cost));
    table.register(Op::Exchange, K::NonCumulativeCost, Arc::new(exchange_own_cost));
    table.register_fallback(K::CumulativeCost, Arc::new(cumulative_cost));

    table.register_fallback(K::AverageColumnSizes, Arc::new(default_column_sizes));
    table.register(Op::Scan, K::AverageColumnSizes, Arc::new(scan_column_sizes));
    table.register(Op::Values, K::AverageColumnSizes, Arc::new(values_column_sizes));
    register_all(
        table,
        &[Op::Filter, Op::Sort, Op::Exchange],
        K::AverageColumnSizes,
        Arc::new(passthrough_column_sizes),
    );
    table.register(Op::Project, K::AverageColumnSizes, Arc::new(project_column_sizes));
    table.register(Op::Aggregate, K::AverageColumnSizes, Arc::new(aggregate_column_sizes));
    table.register(Op::Join, K::AverageColumnSizes, Arc::new(join_column_sizes));
    register_all(
        table,
        &[Op::Union, Op::Intersect, Op::Minus],
        K::AverageColumnSizes,
        Arc::new(set_op_column_sizes),
    );
    table.register_fallback(K::AverageRowSize, Arc::new(average_row_size));

    table.register_fallback(K::Memory, Arc::new(|_: &MetadataQuery<'_>, _: &PlanNode, _: &MetadataArgs| {
        Ok(number(0.0))
    }));
    table.register(Op::Sort, K::Memory, Arc::new(sort_memory));
    table.register(Op::Aggregate, K::Memory, Arc::new(aggregate_memory));
    table.register_fallback(K::CumulativeMemoryWithinPhase, Arc::new(memory_within_phase));
    table.register_fallback(K::CumulativeMemoryWithinPhaseSplit, Arc::new(memory_within_phase_split));

    table.register_fallback(K::IsPhaseTransition, Arc::new(|_: &MetadataQuery<'_>, _: &PlanNode, _: &MetadataArgs| {
        Ok(Some(MetadataValue::Flag(false)))
    }));
    register_all(
        table,
        &[Op::Scan, Op::Values, Op::Exchange],
        K::IsPhaseTransition,
        Arc::new(|_: &MetadataQuery<'_>, _: &PlanNode, _: &MetadataArgs| Ok(Some(MetadataValue::Flag(true)))),
    );
    table.register_fallback(K::SplitCount, Arc::new(split_count));
}

fn cost(rows: f64, cpu: f64, io: f64) -> Option<MetadataValue> {
    Some(MetadataValue::Cost(Cost::new(rows, cpu, io)))
}

fn width(node: &PlanNode) -> f64 {
    node.schema().fields().len() as f64
}

fn default_own_cost(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Some(rows) = mq.tuple_count(node)? else {
        return Ok(None);
    };
    Ok(cost(rows, rows * width(node), 0.0))
}

fn scan_own_cost(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Some(rows) = mq.tuple_count(node)? else {
        return Ok(None);
    };
    Ok(cost(rows, rows + 1.0, 0.0))
}

fn values_own_cost(_: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    match node.op() {
        Operator::Values { rows, .. } => Ok(cost(rows.len() as f64, 1.0, 0.0)),
        _ => Ok(None),
    }
}

fn filter_own_cost(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Filter { input, .. } = node.op() else {
        return Ok(None);
    };
    let (Some(rows), Some(input_rows)) = (mq.tuple_count(node)?, mq.tuple_count(input)?) else {
        return Ok(None);
    };
    Ok(cost(rows, input_rows, 0.0))
}

fn project_own_cost(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Project { exprs, .. } = node.op() else {
        return Ok(None);
    };
    let Some(rows) = mq.tuple_count(node)? else {
        return Ok(None);
    };
    Ok(cost(rows, rows * exprs.len() as f64, 0.0))
}

fn aggregate_own_cost(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Aggregate { input, calls, .. } = node.op() else {
        return Ok(None);
    };
    let (Some(rows), Some(input_rows)) = (mq.tuple_count(node)?, mq.tuple_count(input)?) else {
        return Ok(None);
    };
    let mut multiplier = 1.0 + AGG_CALL_FACTOR * calls.len() as f64;
    for call in calls {
        if matches!(call.function, AggFunction::Sum | AggFunction::Sum0) {
            multiplier += AGG_SUM_FACTOR;
        }
    }
    Ok(cost(rows * multiplier, input_rows * multiplier, 0.0))
}

fn join_own_cost(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Join { left, right, .. } = node.op() else {
        return Ok(None);
    };
    let (Some(rows), Some(l), Some(r)) = (
        mq.tuple_count(node)?,
        mq.tuple_count(left)?,
        mq.tuple_count(right)?,
    ) else {
        return Ok(None);
    };
    Ok(cost(rows, l + r, 0.0))
}

fn sort_own_cost(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Sort { input, .. } = node.op() else {
        return Ok(None);
    };
    let (Some(rows), Some(n)) = (mq.tuple_count(node)?, mq.tuple_count(input)?) else {
        return Ok(None);
    };
    let n = n.max(1.0);
    Ok(cost(rows, n * n.log2() * width(node) * CPU_PER_FIELD_SORT, 0.0))
}

fn exchange_own_cost(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Some(rows) = mq.tuple_count(node)? else {
        return Ok(None);
    };
    Ok(cost(rows, rows * width(node) * CPU_PER_FIELD_EXCHANGE, 0.0))
}

fn cumulative_cost(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Some(mut total) = mq.non_cumulative_cost(node)? else {
        return Ok(None);
    };
    for child in node.children() {
        match mq.cumulative_cost(child)? {
            Some(c) => total = total + c,
            None => return Ok(None),
        }
    }
    Ok(Some(MetadataValue::Cost(total)))
}

pub(crate) fn type_size(data_type: &DataType) -> Option<f64> {
    match data_type {
        DataType::Boolean => Some(1.0),
        DataType::Int32 | DataType::Float32 => Some(4.0),
        DataType::Int64 | DataType::Float64 => Some(8.0),
        DataType::Utf8 => Some(20.0),
        _ => None,
    }
}

fn value_size(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Utf8(s) => s.len() as f64,
        other => type_size(&other.data_type()).unwrap_or(0.0),
    }
}

fn sizes(v: Vec<Option<f64>>) -> Option<MetadataValue> {
    Some(MetadataValue::Sizes(v))
}

fn schema_sizes(node: &PlanNode) -> Vec<Option<f64>> {
    node.schema()
        .fields()
        .iter()
        .map(|f| type_size(f.data_type()))
        .collect()
}

fn default_column_sizes(_: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    Ok(sizes(schema_sizes(node)))
}

fn scan_column_sizes(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let stats = mq.scan_statistics(node);
    let out = node
        .schema()
        .fields()
        .iter()
        .enumerate()
        .map(|(i, f)| {
            stats
                .as_ref()
                .and_then(|s| s.average_column_sizes.get(&i).copied())
                .or_else(|| type_size(f.data_type()))
        })
        .collect();
    Ok(sizes(out))
}

fn values_column_sizes(_: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Values { rows, .. } = node.op() else {
        return Ok(None);
    };
    if rows.is_empty() {
        return Ok(sizes(schema_sizes(node)));
    }
    let n = rows.len() as f64;
    let out = (0..node.schema().fields().len())
        .map(|c| Some(rows.iter().map(|r| r.get(c).map_or(0.0, value_size)).sum::<f64>() / n))
        .collect();
    Ok(sizes(out))
}

fn passthrough_column_sizes(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    match node.children().first() {
        Some(input) => Ok(mq.average_column_sizes(input)?.and_then(sizes)),
        None => Ok(None),
    }
}

fn expr_size(expr: &ScalarExpr, input_sizes: &[Option<f64>]) -> Option<f64> {
    match expr {
        ScalarExpr::InputRef { index, .. } => input_sizes.get(*index).copied().flatten(),
        ScalarExpr::Literal { value, .. } => Some(value_size(value)),
        other => type_size(other.data_type()),
    }
}

fn project_column_sizes(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Project { input, exprs, .. } = node.op() else {
        return Ok(None);
    };
    let input_sizes = mq.average_column_sizes(input)?.unwrap_or_default();
    Ok(sizes(exprs.iter().map(|e| expr_size(e, &input_sizes)).collect()))
}

fn aggregate_column_sizes(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Aggregate {
        input,
        grouping_sets,
        calls,
        indicator,
    } = node.op()
    else {
        return Ok(None);
    };
    let input_sizes = mq.average_column_sizes(input)?.unwrap_or_default();
    let groups = group_set(grouping_sets);
    let mut out: Vec<Option<f64>> = groups
        .iter()
        .map(|g| input_sizes.get(g).copied().flatten())
        .collect();
    if *indicator {
        out.extend(groups.iter().map(|_| Some(1.0)));
    }
    out.extend(calls.iter().map(|c| type_size(&c.ty.data_type)));
    Ok(sizes(out))
}

fn join_column_sizes(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Join {
        left,
        right,
        join_type,
        ..
    } = node.op()
    else {
        return Ok(None);
    };
    let mut out = mq
        .average_column_sizes(left)?
        .unwrap_or_else(|| schema_sizes(left));
    if join_type.projects_right() {
        out.extend(
            mq.average_column_sizes(right)?
                .unwrap_or_else(|| schema_sizes(right)),
        );
    }
    Ok(sizes(out))
}

fn set_op_column_sizes(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let fallback = schema_sizes(node);
    let mut totals = vec![0.0; fallback.len()];
    let mut counts = vec![0usize; fallback.len()];
    for input in node.children() {
        let input_sizes = mq.average_column_sizes(input)?.unwrap_or_default();
        for (c, size) in input_sizes.iter().enumerate().take(totals.len()) {
            if let Some(size) = size {
                totals[c] += size;
                counts[c] += 1;
            }
        }
    }
    let out = totals
        .iter()
        .zip(&counts)
        .zip(&fallback)
        .map(|((total, count), fb)| if *count > 0 { Some(total / *count as f64) } else { *fb })
        .collect();
    Ok(sizes(out))
}

fn average_row_size(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let column_sizes = mq
        .average_column_sizes(node)?
        .unwrap_or_else(|| schema_sizes(node));
    let fallback = schema_sizes(node);
    let total = column_sizes
        .iter()
        .enumerate()
        .map(|(i, s)| s.or_else(|| fallback.get(i).copied().flatten()).unwrap_or(0.0))
        .sum();
    Ok(number(total))
}

fn sort_memory(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Sort { input, .. } = node.op() else {
        return Ok(None);
    };
    let (Some(rows), Some(size)) = (mq.tuple_count(input)?, mq.average_row_size(input)?) else {
        return Ok(None);
    };
    Ok(number(rows * size))
}

fn aggregate_memory(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let (Some(rows), Some(size)) = (mq.tuple_count(node)?, mq.average_row_size(node)?) else {
        return Ok(None);
    };
    Ok(number(rows * size))
}

fn memory_within_phase(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Some(mut total) = mq.memory(node)? else {
        return Ok(None);
    };
    for child in node.children() {
        if mq.is_phase_transition(child)? == Some(true) {
            continue;
        }
        match mq.cumulative_memory_within_phase(child)? {
            Some(m) => total += m,
            None => return Ok(None),
        }
    }
    Ok(number(total))
}

fn memory_within_phase_split(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let (Some(memory), Some(splits)) = (mq.cumulative_memory_within_phase(node)?, mq.split_count(node)?) else {
        return Ok(None);
    };
    Ok(number(memory / splits.max(1) as f64))
}

fn split_count(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Some(distribution) = mq.distribution(node)? else {
        return Ok(None);
    };
    let splits = match distribution.kind {
        DistributionKind::Singleton | DistributionKind::Broadcast | DistributionKind::Any => 1,
        DistributionKind::Hash
        | DistributionKind::Range
        | DistributionKind::Random
        | DistributionKind::RoundRobin => distribution
            .partitions
            .unwrap_or(mq.config().default_split_count),
    };
    Ok(Some(MetadataValue::Count(splits)))
}
