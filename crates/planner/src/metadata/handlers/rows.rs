//! Row-count family: tuple, max, min and distinct row counts, population size
//! and percentage of original rows.

use std::collections::HashSet;
use std::sync::Arc;

use quarry_common::Result;

use super::{guess_selectivity, num_distinct_vals, number, project_sources, HandlerTable};
use crate::expr::ScalarExpr;
use crate::metadata::kinds::{MetadataArgs, MetadataKind as K, MetadataValue};
use crate::metadata::query::MetadataQuery;
use crate::plan::{group_set, JoinType, Operator, OperatorKind as Op, PlanNode};
use crate::traits::ColumnSet;

type Out = Result<Option<MetadataValue>>;

pub(super) fn register(table: &mut HandlerTable) {
    table.register_fallback(K::TupleCount, Arc::new(default_tuple_count));
    table.register(Op::Scan, K::TupleCount, Arc::new(scan_tuple_count));
    table.register(Op::Values, K::TupleCount, Arc::new(values_row_count));
    table.register(Op::Filter, K::TupleCount, Arc::new(filter_tuple_count));
    table.register(Op::Aggregate, K::TupleCount, Arc::new(aggregate_tuple_count));
    table.register(Op::Join, K::TupleCount, Arc::new(join_tuple_count));
    table.register(Op::Union, K::TupleCount, Arc::new(union_tuple_count));
    table.register(Op::Intersect, K::TupleCount, Arc::new(intersect_tuple_count));
    table.register(Op::Minus, K::TupleCount, Arc::new(minus_tuple_count));
    table.register(Op::Sort, K::TupleCount, Arc::new(sort_tuple_count));

    table.register_fallback(K::MaxRowCount, Arc::new(|_: &MetadataQuery<'_>, _: &PlanNode, _: &MetadataArgs| {
        Ok(number(f64::INFINITY))
    }));
    table.register(Op::Values, K::MaxRowCount, Arc::new(values_row_count));
    for op in [Op::Filter, Op::Project, Op::Exchange] {
        table.register(op, K::MaxRowCount, Arc::new(passthrough_max));
    }
    table.register(Op::Aggregate, K::MaxRowCount, Arc::new(aggregate_max));
    table.register(Op::Join, K::MaxRowCount, Arc::new(join_max));
    table.register(Op::Union, K::MaxRowCount, Arc::new(union_max));
    table.register(Op::Intersect, K::MaxRowCount, Arc::new(intersect_max));
    table.register(Op::Minus, K::MaxRowCount, Arc::new(passthrough_max));
    table.register(Op::Sort, K::MaxRowCount, Arc::new(sort_max));

    table.register_fallback(K::MinRowCount, Arc::new(|_: &MetadataQuery<'_>, _: &PlanNode, _: &MetadataArgs| {
        Ok(number(0.0))
    }));
    table.register(Op::Values, K::MinRowCount, Arc::new(values_row_count));
    for op in [Op::Project, Op::Exchange] {
        table.register(op, K::MinRowCount, Arc::new(passthrough_min));
    }
    table.register(Op::Aggregate, K::MinRowCount, Arc::new(aggregate_min));
    table.register(Op::Join, K::MinRowCount, Arc::new(join_min));
    table.register(Op::Union, K::MinRowCount, Arc::new(union_min));
    table.register(Op::Sort, K::MinRowCount, Arc::new(sort_min));

    table.register_fallback(K::DistinctRowCount, Arc::new(default_distinct));
    table.register(Op::Scan, K::DistinctRowCount, Arc::new(scan_distinct));
    table.register(Op::Values, K::DistinctRowCount, Arc::new(values_distinct));
    table.register(Op::Filter, K::DistinctRowCount, Arc::new(filter_distinct));
    table.register(Op::Project, K::DistinctRowCount, Arc::new(project_distinct));
    table.register(Op::Aggregate, K::DistinctRowCount, Arc::new(aggregate_distinct));
    table.register(Op::Join, K::DistinctRowCount, Arc::new(join_distinct));
    table.register(Op::Union, K::DistinctRowCount, Arc::new(union_distinct));
    for op in [Op::Sort, Op::Exchange] {
        table.register(op, K::DistinctRowCount, Arc::new(passthrough_distinct));
    }

    table.register_fallback(K::PopulationSize, Arc::new(default_population));
    table.register(Op::Scan, K::PopulationSize, Arc::new(leaf_population));
    table.register(Op::Values, K::PopulationSize, Arc::new(leaf_population));
    for op in [Op::Filter, Op::Sort, Op::Exchange] {
        table.register(op, K::PopulationSize, Arc::new(passthrough_population));
    }
    table.register(Op::Project, K::PopulationSize, Arc::new(project_population));
    table.register(Op::Aggregate, K::PopulationSize, Arc::new(aggregate_population));
    table.register(Op::Join, K::PopulationSize, Arc::new(join_population));
    table.register(Op::Union, K::PopulationSize, Arc::new(union_population));

    table.register_fallback(K::PercentageOriginalRows, Arc::new(default_percentage));
    table.register(Op::Aggregate, K::PercentageOriginalRows, Arc::new(aggregate_percentage));
    table.register(Op::Union, K::PercentageOriginalRows, Arc::new(union_percentage));
    table.register(Op::Join, K::PercentageOriginalRows, Arc::new(join_percentage));
}

fn default_tuple_count(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    match node.children().first() {
        Some(child) => Ok(mq.tuple_count(child)?.and_then(number)),
        None => Ok(number(mq.config().default_scan_row_count)),
    }
}

fn scan_tuple_count(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let rows = mq
        .scan_statistics(node)
        .and_then(|s| s.row_count)
        .unwrap_or(mq.config().default_scan_row_count);
    Ok(number(rows))
}

fn values_row_count(_: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    match node.op() {
        Operator::Values { rows, .. } => Ok(number(rows.len() as f64)),
        _ => Ok(None),
    }
}

fn filter_tuple_count(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Filter { input, predicate } = node.op() else {
        return Ok(None);
    };
    let Some(rows) = mq.tuple_count(input)? else {
        return Ok(None);
    };
    let sel = mq
        .selectivity(input, Some(predicate))?
        .unwrap_or_else(|| guess_selectivity(Some(predicate)));
    Ok(number(rows * sel))
}

fn aggregate_tuple_count(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Aggregate {
        input,
        grouping_sets,
        ..
    } = node.op()
    else {
        return Ok(None);
    };
    let mut total = 0.0;
    for set in grouping_sets {
        if set.is_empty() {
            total += 1.0;
            continue;
        }
        let groups = match mq.distinct_row_count(input, set, None)? {
            Some(d) => d,
            None => match mq.tuple_count(input)? {
                Some(rows) => rows / 10.0,
                None => return Ok(None),
            },
        };
        total += groups;
    }
    Ok(number(total))
}

fn join_tuple_count(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Join {
        left,
        right,
        condition,
        join_type,
    } = node.op()
    else {
        return Ok(None);
    };
    let (Some(l), Some(r)) = (mq.tuple_count(left)?, mq.tuple_count(right)?) else {
        return Ok(None);
    };
    let sel = guess_selectivity(Some(condition));
    let inner = l * r * sel;
    let rows = match join_type {
        JoinType::Inner => inner,
        JoinType::Left => inner.max(l),
        JoinType::Right => inner.max(r),
        JoinType::Full => inner.max(l.max(r)),
        JoinType::Semi => l * sel,
        JoinType::Anti => l * (1.0 - sel),
    };
    Ok(number(rows))
}

fn set_inputs(node: &PlanNode) -> Option<(&[PlanNode], bool)> {
    match node.op() {
        Operator::Union { inputs, all }
        | Operator::Intersect { inputs, all }
        | Operator::Minus { inputs, all } => Some((inputs.as_slice(), *all)),
        _ => None,
    }
}

fn input_counts(
    mq: &MetadataQuery<'_>,
    inputs: &[PlanNode],
    f: impl Fn(&MetadataQuery<'_>, &PlanNode) -> Result<Option<f64>>,
) -> Result<Option<Vec<f64>>> {
    let mut out = Vec::with_capacity(inputs.len());
    for input in inputs {
        match f(mq, input)? {
            Some(v) => out.push(v),
            None => return Ok(None),
        }
    }
    Ok(Some(out))
}

fn union_tuple_count(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Some((inputs, all)) = set_inputs(node) else {
        return Ok(None);
    };
    let Some(counts) = input_counts(mq, inputs, |mq, n| mq.tuple_count(n))? else {
        return Ok(None);
    };
    let sum: f64 = counts.iter().sum();
    Ok(number(if all { sum } else { sum * 0.5 }))
}

fn intersect_tuple_count(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Some((inputs, _)) = set_inputs(node) else {
        return Ok(None);
    };
    let Some(counts) = input_counts(mq, inputs, |mq, n| mq.tuple_count(n))? else {
        return Ok(None);
    };
    let min = counts.iter().copied().fold(f64::INFINITY, f64::min);
    Ok(number(min * 0.25))
}

fn minus_tuple_count(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Some((inputs, _)) = set_inputs(node) else {
        return Ok(None);
    };
    let Some(counts) = input_counts(mq, inputs, |mq, n| mq.tuple_count(n))? else {
        return Ok(None);
    };
    let rows = counts
        .iter()
        .skip(1)
        .fold(counts.first().copied().unwrap_or(0.0), |acc, other| acc - 0.5 * other);
    Ok(number(rows.max(0.0)))
}

fn limit(rows: f64, offset: Option<usize>, fetch: Option<usize>) -> f64 {
    let mut rows = (rows - offset.unwrap_or(0) as f64).max(0.0);
    if let Some(fetch) = fetch {
        rows = rows.min(fetch as f64);
    }
    rows
}

fn sort_tuple_count(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Sort {
        input,
        offset,
        fetch,
        ..
    } = node.op()
    else {
        return Ok(None);
    };
    Ok(mq
        .tuple_count(input)?
        .map(|rows| limit(rows, *offset, *fetch))
        .and_then(number))
}

fn passthrough_max(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    match node.children().first() {
        Some(child) => Ok(mq.max_row_count(child)?.and_then(number)),
        None => Ok(None),
    }
}

fn passthrough_min(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    match node.children().first() {
        Some(child) => Ok(mq.min_row_count(child)?.and_then(number)),
        None => Ok(None),
    }
}

fn aggregate_max(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Aggregate {
        input,
        grouping_sets,
        ..
    } = node.op()
    else {
        return Ok(None);
    };
    // An empty grouping set emits one row even over empty input.
    let empty = grouping_sets.iter().filter(|s| s.is_empty()).count() as f64;
    let keyed = grouping_sets.len() as f64 - empty;
    if keyed == 0.0 {
        return Ok(number(empty));
    }
    Ok(mq
        .max_row_count(input)?
        .map(|m| empty + mul_rows(m, keyed))
        .and_then(number))
}

fn mul_rows(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        0.0
    } else {
        a * b
    }
}

fn join_max(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Join {
        left,
        right,
        join_type,
        ..
    } = node.op()
    else {
        return Ok(None);
    };
    let (Some(l), Some(r)) = (mq.max_row_count(left)?, mq.max_row_count(right)?) else {
        return Ok(None);
    };
    let rows = match join_type {
        JoinType::Inner => mul_rows(l, r),
        JoinType::Left if r == 0.0 => l,
        JoinType::Right if l == 0.0 => r,
        JoinType::Full if l == 0.0 => r,
        JoinType::Full if r == 0.0 => l,
        JoinType::Left | JoinType::Right | JoinType::Full => mul_rows(l, r),
        JoinType::Semi | JoinType::Anti => l,
    };
    Ok(number(rows))
}

fn union_max(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Some((inputs, _)) = set_inputs(node) else {
        return Ok(None);
    };
    Ok(input_counts(mq, inputs, |mq, n| mq.max_row_count(n))?
        .map(|c| c.iter().sum())
        .and_then(number))
}

fn intersect_max(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Some((inputs, _)) = set_inputs(node) else {
        return Ok(None);
    };
    Ok(input_counts(mq, inputs, |mq, n| mq.max_row_count(n))?
        .map(|c| c.iter().copied().fold(f64::INFINITY, f64::min))
        .and_then(number))
}

fn sort_max(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Sort {
        input,
        offset,
        fetch,
        ..
    } = node.op()
    else {
        return Ok(None);
    };
    let max = mq.max_row_count(input)?.unwrap_or(f64::INFINITY);
    Ok(number(limit(max, *offset, *fetch)))
}

fn aggregate_min(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Aggregate {
        input,
        grouping_sets,
        ..
    } = node.op()
    else {
        return Ok(None);
    };
    let empty = grouping_sets.iter().filter(|s| s.is_empty()).count() as f64;
    let keyed = grouping_sets.len() as f64 - empty;
    match mq.min_row_count(input)? {
        Some(rows) if rows >= 1.0 => Ok(number(empty + keyed)),
        _ => Ok(number(empty)),
    }
}

fn join_min(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Join {
        left,
        right,
        join_type,
        ..
    } = node.op()
    else {
        return Ok(None);
    };
    let rows = match join_type {
        JoinType::Left => mq.min_row_count(left)?,
        JoinType::Right => mq.min_row_count(right)?,
        JoinType::Full => match (mq.min_row_count(left)?, mq.min_row_count(right)?) {
            (Some(l), Some(r)) => Some(l.max(r)),
            _ => None,
        },
        JoinType::Inner | JoinType::Semi | JoinType::Anti => Some(0.0),
    };
    Ok(rows.and_then(number))
}

fn union_min(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Some((inputs, all)) = set_inputs(node) else {
        return Ok(None);
    };
    let Some(counts) = input_counts(mq, inputs, |mq, n| mq.min_row_count(n))? else {
        return Ok(None);
    };
    if all {
        Ok(number(counts.iter().sum()))
    } else {
        let any = counts.iter().any(|c| *c >= 1.0);
        Ok(number(if any { 1.0 } else { 0.0 }))
    }
}

fn sort_min(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Sort {
        input,
        offset,
        fetch,
        ..
    } = node.op()
    else {
        return Ok(None);
    };
    Ok(mq
        .min_row_count(input)?
        .map(|rows| limit(rows, *offset, *fetch))
        .and_then(number))
}

fn group_key(args: &MetadataArgs) -> Option<(&ColumnSet, Option<&ScalarExpr>)> {
    match args {
        MetadataArgs::GroupKey { key, predicate } => Some((key, predicate.as_ref())),
        _ => None,
    }
}

/// Distinct count of `key` over `node` when only its row count is known.
fn estimate_distinct(
    mq: &MetadataQuery<'_>,
    node: &PlanNode,
    key: &ColumnSet,
    predicate: Option<&ScalarExpr>,
) -> Result<Option<f64>> {
    let sel = guess_selectivity(predicate);
    if key.is_empty() {
        return Ok(Some(if sel > 0.0 { 1.0 } else { 0.0 }));
    }
    let Some(rows) = mq.tuple_count(node)? else {
        return Ok(None);
    };
    if mq.are_columns_unique(node, key, false)? == Some(true) {
        return Ok(Some(rows * sel));
    }
    let domain = rows / 10.0;
    Ok(Some(num_distinct_vals(domain, domain * sel)))
}

fn default_distinct(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Some((key, predicate)) = group_key(args) else {
        return Ok(None);
    };
    Ok(estimate_distinct(mq, node, key, predicate)?.and_then(number))
}

fn scan_distinct(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Some((key, predicate)) = group_key(args) else {
        return Ok(None);
    };
    if key.is_empty() {
        return Ok(estimate_distinct(mq, node, key, predicate)?.and_then(number));
    }
    let Some(rows) = mq.tuple_count(node)? else {
        return Ok(None);
    };
    let sel = guess_selectivity(predicate);
    if mq.are_columns_unique(node, key, false)? == Some(true) {
        return Ok(number(rows * sel));
    }
    let stats = mq.scan_statistics(node);
    let ndv = stats.and_then(|s| {
        key.iter()
            .map(|c| s.distinct_counts.get(&c).copied())
            .try_fold(1.0, |acc, d| d.map(|d| acc * d))
    });
    match ndv {
        Some(domain) => Ok(number(num_distinct_vals(domain.min(rows), rows * sel))),
        None => Ok(estimate_distinct(mq, node, key, predicate)?.and_then(number)),
    }
}

fn values_distinct(_: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Values { rows, .. }, Some((key, predicate))) = (node.op(), group_key(args)) else {
        return Ok(None);
    };
    let mut seen = HashSet::new();
    for row in rows {
        let Some(k) = key.iter().map(|c| row.get(c)).collect::<Option<Vec<_>>>() else {
            return Ok(None);
        };
        seen.insert(k);
    }
    let distinct = seen.len() as f64;
    Ok(number(distinct * guess_selectivity(predicate)))
}

fn filter_distinct(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Filter { input, predicate: own }, Some((key, predicate))) = (node.op(), group_key(args))
    else {
        return Ok(None);
    };
    let mut conjuncts = vec![own.clone()];
    conjuncts.extend(predicate.cloned());
    let combined = ScalarExpr::and_all(conjuncts)?;
    Ok(mq.distinct_row_count(input, key, Some(&combined))?.and_then(number))
}

fn passthrough_distinct(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Some(input), Some((key, predicate))) = (node.children().first().copied(), group_key(args)) else {
        return Ok(None);
    };
    Ok(mq.distinct_row_count(input, key, predicate)?.and_then(number))
}

/// Input columns read by the projected `key` columns.
fn project_key_inputs(exprs: &[ScalarExpr], key: &ColumnSet) -> Option<ColumnSet> {
    let mut cols = Vec::new();
    for c in key.iter() {
        cols.extend(exprs.get(c)?.referenced_inputs());
    }
    Some(cols.into_iter().collect())
}

fn substitute(expr: &ScalarExpr, exprs: &[ScalarExpr]) -> Result<Option<ScalarExpr>> {
    let mut missing = false;
    let rewritten = expr.map_input_refs(&mut |i, ty| match exprs.get(i) {
        Some(e) => Ok(e.clone()),
        None => {
            missing = true;
            Ok(ScalarExpr::input_ref(i, ty.clone()))
        }
    })?;
    Ok((!missing).then_some(rewritten))
}

fn project_distinct(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Project { input, exprs, .. }, Some((key, predicate))) = (node.op(), group_key(args)) else {
        return Ok(None);
    };
    let Some(input_key) = project_key_inputs(exprs, key) else {
        return Ok(None);
    };
    let pushed = match predicate {
        Some(p) => substitute(p, exprs)?,
        None => None,
    };
    let Some(distinct) = mq.distinct_row_count(input, &input_key, pushed.as_ref())? else {
        return Ok(None);
    };
    let cap = mq.tuple_count(node)?.unwrap_or(f64::INFINITY);
    Ok(number(distinct.min(cap)))
}

/// Maps output columns of an aggregate onto input group columns; `None` if any
/// column is an indicator or aggregate result.
fn aggregate_key_inputs<'n>(node: &'n PlanNode, key: &ColumnSet) -> Option<(ColumnSet, &'n PlanNode)> {
    let Operator::Aggregate {
        input,
        grouping_sets,
        ..
    } = node.op()
    else {
        return None;
    };
    let groups = group_set(grouping_sets);
    let mapped = key
        .iter()
        .map(|c| groups.as_slice().get(c).copied())
        .collect::<Option<ColumnSet>>()?;
    Some((mapped, &**input))
}

fn aggregate_distinct(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Some((key, predicate)) = group_key(args) else {
        return Ok(None);
    };
    let Some((mapped, input)) = aggregate_key_inputs(node, key) else {
        return Ok(None);
    };
    let Some(distinct) = mq.distinct_row_count(input, &mapped, None)? else {
        return Ok(None);
    };
    Ok(number(distinct * guess_selectivity(predicate)))
}

fn split_join_key(key: &ColumnSet, left_width: usize) -> (ColumnSet, ColumnSet) {
    let left = key.iter().filter(|c| *c < left_width).collect();
    let right = key
        .iter()
        .filter(|c| *c >= left_width)
        .map(|c| c - left_width)
        .collect();
    (left, right)
}

fn join_distinct(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Join {
        left,
        right,
        join_type,
        ..
    }, Some((key, predicate))) = (node.op(), group_key(args))
    else {
        return Ok(None);
    };
    let (lk, rk) = split_join_key(key, left.schema().fields().len());
    let Some(l) = mq.distinct_row_count(left, &lk, None)? else {
        return Ok(None);
    };
    let r = if join_type.projects_right() {
        match mq.distinct_row_count(right, &rk, None)? {
            Some(r) => r,
            None => return Ok(None),
        }
    } else {
        1.0
    };
    let cap = mq.tuple_count(node)?.unwrap_or(f64::INFINITY);
    let combined = (l * r).min(cap);
    Ok(number(num_distinct_vals(combined, combined * guess_selectivity(predicate))))
}

fn union_distinct(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Some((inputs, _)), Some((key, predicate))) = (set_inputs(node), group_key(args)) else {
        return Ok(None);
    };
    Ok(input_counts(mq, inputs, |mq, n| mq.distinct_row_count(n, key, predicate))?
        .map(|c| c.iter().sum())
        .and_then(number))
}

fn population_key(args: &MetadataArgs) -> Option<&ColumnSet> {
    group_key(args).map(|(k, _)| k)
}

fn default_population(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Some(key) = population_key(args) else {
        return Ok(None);
    };
    if mq.are_columns_unique(node, key, false)? == Some(true) {
        return Ok(mq.tuple_count(node)?.and_then(number));
    }
    Ok(None)
}

fn leaf_population(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Some(key) = population_key(args) else {
        return Ok(None);
    };
    Ok(mq.distinct_row_count(node, key, None)?.and_then(number))
}

fn passthrough_population(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Some(input), Some(key)) = (node.children().first().copied(), population_key(args)) else {
        return Ok(None);
    };
    Ok(mq.population_size(input, key)?.and_then(number))
}

fn project_population(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Project { input, exprs, .. }, Some(key)) = (node.op(), population_key(args)) else {
        return Ok(None);
    };
    let sources = project_sources(exprs);
    let mapped = key
        .iter()
        .map(|c| sources.get(c).copied().flatten())
        .collect::<Option<ColumnSet>>();
    match mapped {
        Some(mapped) => Ok(mq.population_size(input, &mapped)?.and_then(number)),
        None => {
            let Some(input_key) = project_key_inputs(exprs, key) else {
                return Ok(None);
            };
            Ok(mq.population_size(input, &input_key)?.and_then(number))
        }
    }
}

fn aggregate_population(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Some(key) = population_key(args) else {
        return Ok(None);
    };
    let Some((mapped, input)) = aggregate_key_inputs(node, key) else {
        return Ok(None);
    };
    Ok(mq.population_size(input, &mapped)?.and_then(number))
}

fn join_population(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Join {
        left,
        right,
        join_type,
        ..
    }, Some(key)) = (node.op(), population_key(args))
    else {
        return Ok(None);
    };
    let (lk, rk) = split_join_key(key, left.schema().fields().len());
    let Some(l) = mq.population_size(left, &lk)? else {
        return Ok(None);
    };
    if !join_type.projects_right() {
        return Ok(number(l));
    }
    Ok(mq.population_size(right, &rk)?.map(|r| l * r).and_then(number))
}

fn union_population(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Some((inputs, _)), Some(key)) = (set_inputs(node), population_key(args)) else {
        return Ok(None);
    };
    Ok(input_counts(mq, inputs, |mq, n| mq.population_size(n, key))?
        .map(|c| c.iter().sum())
        .and_then(number))
}

fn quotient_for_percentage(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        return 1.0;
    }
    (numerator / denominator).clamp(0.0, 1.0)
}

fn default_percentage(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let children = node.children();
    if children.is_empty() {
        return Ok(number(1.0));
    }
    let Some(rows) = mq.tuple_count(node)? else {
        return Ok(None);
    };
    let mut original = 0.0;
    for child in children {
        let (Some(child_rows), Some(pct)) = (mq.tuple_count(child)?, mq.percentage_original_rows(child)?) else {
            return Ok(None);
        };
        original += if pct > 0.0 { child_rows / pct } else { 0.0 };
    }
    Ok(number(quotient_for_percentage(rows, original)))
}

fn aggregate_percentage(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    match node.children().first() {
        Some(input) => Ok(mq.percentage_original_rows(input)?.and_then(number)),
        None => Ok(None),
    }
}

fn union_percentage(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for input in node.children() {
        let (Some(rows), Some(pct)) = (mq.tuple_count(input)?, mq.percentage_original_rows(input)?) else {
            return Ok(None);
        };
        numerator += rows;
        denominator += if pct > 0.0 { rows / pct } else { 0.0 };
    }
    Ok(number(quotient_for_percentage(numerator, denominator)))
}

fn join_percentage(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Join { left, right, .. } = node.op() else {
        return Ok(None);
    };
    let (Some(l), Some(r)) = (mq.percentage_original_rows(left)?, mq.percentage_original_rows(right)?) else {
        return Ok(None);
    };
    Ok(number(l * r))
}
