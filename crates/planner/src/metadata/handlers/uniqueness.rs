//! Unique keys and column-set uniqueness.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use quarry_common::Result;

use super::{equi_join_keys, project_sources, project_target, register_all, HandlerTable};
use crate::metadata::kinds::{MetadataArgs, MetadataKind as K, MetadataValue};
use crate::metadata::query::MetadataQuery;
use crate::plan::{group_set, JoinType, Operator, OperatorKind as Op, PlanNode};
use crate::traits::ColumnSet;

type Out = Result<Option<MetadataValue>>;

pub(super) fn register(table: &mut HandlerTable) {
    table.register(Op::Scan, K::UniqueKeys, Arc::new(scan_keys));
    table.register(Op::Values, K::UniqueKeys, Arc::new(values_keys));
    register_all(table, &[Op::Filter, Op::Exchange], K::UniqueKeys, Arc::new(passthrough_keys));
    table.register(Op::Sort, K::UniqueKeys, Arc::new(sort_keys));
    table.register(Op::Project, K::UniqueKeys, Arc::new(project_keys));
    table.register(Op::Aggregate, K::UniqueKeys, Arc::new(aggregate_keys));
    table.register(Op::Join, K::UniqueKeys, Arc::new(join_keys));
    register_all(
        table,
        &[Op::Union, Op::Intersect, Op::Minus],
        K::UniqueKeys,
        Arc::new(set_op_keys),
    );

    table.register_fallback(K::ColumnUniqueness, Arc::new(default_unique));
    table.register(Op::Scan, K::ColumnUniqueness, Arc::new(scan_unique));
    table.register(Op::Values, K::ColumnUniqueness, Arc::new(values_unique));
    register_all(
        table,
        &[Op::Filter, Op::Sort, Op::Exchange],
        K::ColumnUniqueness,
        Arc::new(passthrough_unique),
    );
    table.register(Op::Project, K::ColumnUniqueness, Arc::new(project_unique));
    table.register(Op::Aggregate, K::ColumnUniqueness, Arc::new(aggregate_unique));
    table.register(Op::Join, K::ColumnUniqueness, Arc::new(join_unique));
    register_all(
        table,
        &[Op::Union, Op::Intersect, Op::Minus],
        K::ColumnUniqueness,
        Arc::new(set_op_unique),
    );
}

fn ignore_nulls(args: &MetadataArgs) -> bool {
    matches!(args, MetadataArgs::IgnoreNulls(true))
}

fn keys(set: BTreeSet<ColumnSet>) -> Option<MetadataValue> {
    Some(MetadataValue::Keys(set))
}

fn single_row_keys() -> Option<MetadataValue> {
    keys(BTreeSet::from([ColumnSet::empty()]))
}

fn scan_keys(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    Ok(mq
        .scan_descriptor(node)
        .map(|d| d.unique_keys.into_iter().collect())
        .and_then(keys))
}

fn values_keys(_: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    match node.op() {
        Operator::Values { rows, .. } if rows.len() <= 1 => Ok(single_row_keys()),
        _ => Ok(None),
    }
}

fn passthrough_keys(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    match node.children().first() {
        Some(input) => Ok(mq.unique_keys(input, ignore_nulls(args))?.and_then(keys)),
        None => Ok(None),
    }
}

fn sort_keys(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    match node.op() {
        Operator::Sort { fetch: Some(f), .. } if *f <= 1 => Ok(single_row_keys()),
        _ => passthrough_keys(mq, node, args),
    }
}

fn project_keys(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Operator::Project { input, exprs, .. } = node.op() else {
        return Ok(None);
    };
    let Some(input_keys) = mq.unique_keys(input, ignore_nulls(args))? else {
        return Ok(None);
    };
    let mapped = input_keys
        .iter()
        .filter_map(|key| {
            key.iter()
                .map(|c| project_target(exprs, c))
                .collect::<Option<ColumnSet>>()
        })
        .collect();
    Ok(keys(mapped))
}

fn aggregate_keys(_: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Aggregate { grouping_sets, .. } = node.op() else {
        return Ok(None);
    };
    if grouping_sets.len() != 1 {
        return Ok(None);
    }
    Ok(keys(BTreeSet::from([ColumnSet::range(grouping_sets[0].len())])))
}

fn shift(key: &ColumnSet, by: usize) -> ColumnSet {
    key.iter().map(|c| c + by).collect()
}

fn join_keys(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Operator::Join {
        left,
        right,
        condition,
        join_type,
    } = node.op()
    else {
        return Ok(None);
    };
    let nulls = ignore_nulls(args);
    let left_keys = mq.unique_keys(left, nulls)?.unwrap_or_default();
    if !join_type.projects_right() {
        return Ok(keys(left_keys));
    }
    let right_keys = mq.unique_keys(right, nulls)?.unwrap_or_default();
    let width = left.schema().fields().len();
    let pairs = equi_join_keys(condition, width);
    let left_eq: ColumnSet = pairs.iter().map(|(l, _)| *l).collect();
    let right_eq: ColumnSet = pairs.iter().map(|(_, r)| *r).collect();

    let mut out = BTreeSet::new();
    if *join_type == JoinType::Inner {
        for lk in &left_keys {
            for rk in &right_keys {
                out.insert(lk.union(&shift(rk, width)));
            }
        }
    }
    let right_unique_on_eq =
        !pairs.is_empty() && mq.are_columns_unique(right, &right_eq, nulls)? == Some(true);
    if right_unique_on_eq && matches!(join_type, JoinType::Inner | JoinType::Left) {
        out.extend(left_keys.iter().cloned());
    }
    let left_unique_on_eq =
        !pairs.is_empty() && mq.are_columns_unique(left, &left_eq, nulls)? == Some(true);
    if left_unique_on_eq && matches!(join_type, JoinType::Inner | JoinType::Right) {
        out.extend(right_keys.iter().map(|k| shift(k, width)));
    }
    Ok(keys(out))
}

fn set_op_keys(_: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    match node.op() {
        Operator::Union { all: true, .. } => Ok(None),
        Operator::Union { .. } | Operator::Intersect { .. } | Operator::Minus { .. } => Ok(keys(
            BTreeSet::from([ColumnSet::range(node.schema().fields().len())]),
        )),
        _ => Ok(None),
    }
}

fn columns_arg(args: &MetadataArgs) -> Option<(&ColumnSet, bool)> {
    match args {
        MetadataArgs::Columns {
            columns,
            ignore_nulls,
        } => Some((columns, *ignore_nulls)),
        _ => None,
    }
}

fn flag(v: bool) -> Option<MetadataValue> {
    Some(MetadataValue::Flag(v))
}

/// An empty column set is unique exactly when at most one row can appear.
fn empty_columns(mq: &MetadataQuery<'_>, node: &PlanNode) -> Out {
    match mq.max_row_count(node)? {
        Some(max) if max <= 1.0 => Ok(flag(true)),
        _ => Ok(None),
    }
}

fn default_unique(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Some((columns, nulls)) = columns_arg(args) else {
        return Ok(None);
    };
    if columns.is_empty() {
        return empty_columns(mq, node);
    }
    let covered = mq
        .unique_keys(node, nulls)?
        .map(|ks| ks.iter().any(|k| k.is_subset(columns)))
        .unwrap_or(false);
    Ok(if covered { flag(true) } else { None })
}

fn scan_unique(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Some((columns, _)) = columns_arg(args) else {
        return Ok(None);
    };
    if columns.is_empty() {
        return empty_columns(mq, node);
    }
    let Some(descriptor) = mq.scan_descriptor(node) else {
        return Ok(None);
    };
    Ok(flag(descriptor.unique_keys.iter().any(|k| k.is_subset(columns))))
}

fn values_unique(_: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Values { rows, .. }, Some((columns, nulls))) = (node.op(), columns_arg(args)) else {
        return Ok(None);
    };
    let mut seen = HashSet::new();
    for row in rows {
        let Some(key) = columns.iter().map(|c| row.get(c)).collect::<Option<Vec<_>>>() else {
            return Ok(None);
        };
        if nulls && key.iter().any(|v| v.is_null()) {
            continue;
        }
        if !seen.insert(key) {
            return Ok(flag(false));
        }
    }
    Ok(flag(true))
}

fn passthrough_unique(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Some(input), Some((columns, nulls))) = (node.children().first().copied(), columns_arg(args)) else {
        return Ok(None);
    };
    if let Operator::Sort { fetch: Some(f), .. } = node.op() {
        if *f <= 1 {
            return Ok(flag(true));
        }
    }
    Ok(mq.are_columns_unique(input, columns, nulls)?.and_then(flag))
}

fn project_unique(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Project { input, exprs, .. }, Some((columns, nulls))) = (node.op(), columns_arg(args)) else {
        return Ok(None);
    };
    if columns.is_empty() {
        return empty_columns(mq, node);
    }
    let sources = project_sources(exprs);
    let mapped: ColumnSet = columns
        .iter()
        .filter_map(|c| sources.get(c).copied().flatten())
        .collect();
    let complete = columns.iter().all(|c| matches!(sources.get(c), Some(Some(_))));
    if mapped.is_empty() {
        return Ok(None);
    }
    match mq.are_columns_unique(input, &mapped, nulls)? {
        Some(true) => Ok(flag(true)),
        Some(false) if complete => Ok(flag(false)),
        _ => Ok(None),
    }
}

fn aggregate_unique(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Aggregate {
        input,
        grouping_sets,
        ..
    }, Some((columns, nulls))) = (node.op(), columns_arg(args))
    else {
        return Ok(None);
    };
    if columns.is_empty() {
        return empty_columns(mq, node);
    }
    if grouping_sets.len() != 1 {
        return Ok(None);
    }
    let groups = group_set(grouping_sets);
    if ColumnSet::range(groups.len()).is_subset(columns) {
        return Ok(flag(true));
    }
    let in_groups = columns.iter().all(|c| c < groups.len());
    if !in_groups {
        return Ok(None);
    }
    let mapped: ColumnSet = columns.iter().map(|c| groups.as_slice()[c]).collect();
    // Duplicates in the input may collapse into one group, so only `true` carries over.
    match mq.are_columns_unique(input, &mapped, nulls)? {
        Some(true) => Ok(flag(true)),
        _ => Ok(None),
    }
}

fn join_unique(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let (Operator::Join {
        left,
        right,
        condition,
        join_type,
    }, Some((columns, nulls))) = (node.op(), columns_arg(args))
    else {
        return Ok(None);
    };
    if columns.is_empty() {
        return empty_columns(mq, node);
    }
    let width = left.schema().fields().len();
    let left_cols: ColumnSet = columns.iter().filter(|c| *c < width).collect();
    let right_cols: ColumnSet = columns.iter().filter(|c| *c >= width).map(|c| c - width).collect();
    if !join_type.projects_right() {
        return Ok(mq.are_columns_unique(left, &left_cols, nulls)?.and_then(flag));
    }
    // Outer joins pad with nulls, which only keeps uniqueness when nulls are ignored.
    let left_padded = matches!(join_type, JoinType::Right | JoinType::Full) && !nulls;
    let right_padded = matches!(join_type, JoinType::Left | JoinType::Full) && !nulls;

    let left_unique = if left_cols.is_empty() {
        Some(false)
    } else {
        mq.are_columns_unique(left, &left_cols, nulls)?
    };
    let right_unique = if right_cols.is_empty() {
        Some(false)
    } else {
        mq.are_columns_unique(right, &right_cols, nulls)?
    };
    if left_unique == Some(true) && right_unique == Some(true) && !left_padded && !right_padded {
        return Ok(flag(true));
    }
    let pairs = equi_join_keys(condition, width);
    if pairs.is_empty() {
        return Ok(None);
    }
    let left_eq: ColumnSet = pairs.iter().map(|(l, _)| *l).collect();
    let right_eq: ColumnSet = pairs.iter().map(|(_, r)| *r).collect();
    if left_unique == Some(true)
        && !left_padded
        && mq.are_columns_unique(right, &right_eq, nulls)? == Some(true)
    {
        return Ok(flag(true));
    }
    if right_unique == Some(true)
        && !right_padded
        && mq.are_columns_unique(left, &left_eq, nulls)? == Some(true)
    {
        return Ok(flag(true));
    }
    Ok(None)
}

fn set_op_unique(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Some((columns, _)) = columns_arg(args) else {
        return Ok(None);
    };
    let distinct = matches!(
        node.op(),
        Operator::Union { all: false, .. }
            | Operator::Intersect { all: false, .. }
            | Operator::Minus { all: false, .. }
    );
    if distinct && ColumnSet::range(node.schema().fields().len()).is_subset(columns) {
        return Ok(flag(true));
    }
    default_unique(mq, node, args)
}
