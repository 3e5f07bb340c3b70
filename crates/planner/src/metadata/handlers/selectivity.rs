use std::sync::Arc;

use quarry_common::Result;

use super::{guess_selectivity, number, register_all, HandlerTable};
use crate::expr::ScalarExpr;
use crate::metadata::kinds::{MetadataArgs, MetadataKind as K, MetadataValue};
use crate::metadata::query::MetadataQuery;
use crate::plan::{group_set, Operator, OperatorKind as Op, PlanNode};

type Out = Result<Option<MetadataValue>>;

pub(super) fn register(table: &mut HandlerTable) {
    table.register_fallback(K::Selectivity, Arc::new(default_selectivity));
    table.register(Op::Filter, K::Selectivity, Arc::new(filter_selectivity));
    table.register(Op::Project, K::Selectivity, Arc::new(project_selectivity));
    table.register(Op::Aggregate, K::Selectivity, Arc::new(aggregate_selectivity));
    table.register(Op::Union, K::Selectivity, Arc::new(union_selectivity));
    register_all(
        table,
        &[Op::Sort, Op::Exchange],
        K::Selectivity,
        Arc::new(passthrough_selectivity),
    );
}

fn predicate(args: &MetadataArgs) -> Option<&ScalarExpr> {
    match args {
        MetadataArgs::Predicate(p) => p.as_ref(),
        _ => None,
    }
}

fn default_selectivity(_: &MetadataQuery<'_>, _: &PlanNode, args: &MetadataArgs) -> Out {
    Ok(number(guess_selectivity(predicate(args))))
}

fn passthrough_selectivity(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    match node.children().first() {
        Some(input) => Ok(mq.selectivity(input, predicate(args))?.and_then(number)),
        None => Ok(None),
    }
}

fn filter_selectivity(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Operator::Filter { input, predicate: own } = node.op() else {
        return Ok(None);
    };
    let Some(requested) = predicate(args) else {
        return Ok(number(1.0));
    };
    // Conjuncts the filter already enforces hold for every output row.
    let enforced = own.conjuncts();
    let remaining: Vec<ScalarExpr> = requested
        .conjuncts()
        .into_iter()
        .filter(|c| !enforced.contains(c))
        .cloned()
        .collect();
    if remaining.is_empty() {
        return Ok(number(1.0));
    }
    let rest = ScalarExpr::and_all(remaining)?;
    Ok(mq.selectivity(input, Some(&rest))?.and_then(number))
}

fn project_selectivity(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Operator::Project { input, exprs, .. } = node.op() else {
        return Ok(None);
    };
    let Some(requested) = predicate(args) else {
        return Ok(number(1.0));
    };
    let mut missing = false;
    let pushed = requested.map_input_refs(&mut |i, ty| match exprs.get(i) {
        Some(e) => Ok(e.clone()),
        None => {
            missing = true;
            Ok(ScalarExpr::input_ref(i, ty.clone()))
        }
    })?;
    if missing {
        return Ok(number(guess_selectivity(Some(requested))));
    }
    Ok(mq.selectivity(input, Some(&pushed))?.and_then(number))
}

fn aggregate_selectivity(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let Operator::Aggregate {
        input,
        grouping_sets,
        ..
    } = node.op()
    else {
        return Ok(None);
    };
    let Some(requested) = predicate(args) else {
        return Ok(number(1.0));
    };
    let groups = group_set(grouping_sets);
    let mut pushable = Vec::new();
    let mut residual = Vec::new();
    for conjunct in requested.conjuncts() {
        if conjunct.referenced_inputs().iter().all(|c| *c < groups.len()) {
            let mapped = conjunct.map_input_refs(&mut |i, ty| {
                Ok(ScalarExpr::input_ref(groups.as_slice()[i], ty.clone()))
            })?;
            pushable.push(mapped);
        } else {
            residual.push(conjunct.clone());
        }
    }
    let pushed_sel = if pushable.is_empty() {
        1.0
    } else {
        let pushed = ScalarExpr::and_all(pushable)?;
        match mq.selectivity(input, Some(&pushed))? {
            Some(s) => s,
            None => return Ok(None),
        }
    };
    let residual_sel = if residual.is_empty() {
        1.0
    } else {
        guess_selectivity(Some(&ScalarExpr::and_all(residual)?))
    };
    Ok(number(pushed_sel * residual_sel))
}

fn union_selectivity(mq: &MetadataQuery<'_>, node: &PlanNode, args: &MetadataArgs) -> Out {
    let mut total_rows = 0.0;
    let mut selected = 0.0;
    for input in node.children() {
        let (Some(rows), Some(sel)) = (mq.tuple_count(input)?, mq.selectivity(input, predicate(args))?) else {
            return Ok(None);
        };
        total_rows += rows;
        selected += rows * sel;
    }
    if total_rows == 0.0 {
        return Ok(number(guess_selectivity(predicate(args))));
    }
    Ok(number(selected / total_rows))
}
