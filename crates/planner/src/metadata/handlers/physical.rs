use std::collections::BTreeMap;
use std::sync::Arc;

use quarry_common::Result;

use super::{project_target, register_all, HandlerTable};
use crate::metadata::kinds::{MetadataArgs, MetadataKind as K, MetadataValue};
use crate::metadata::query::MetadataQuery;
use crate::plan::{Operator, OperatorKind as Op, PlanNode};
use crate::traits::{Collation, Distribution, DistributionKind};

type Out = Result<Option<MetadataValue>>;

pub(super) fn register(table: &mut HandlerTable) {
    table.register_fallback(K::Collation, Arc::new(|_: &MetadataQuery<'_>, _: &PlanNode, _: &MetadataArgs| {
        Ok(collations(Vec::new()))
    }));
    table.register(Op::Scan, K::Collation, Arc::new(scan_collations));
    table.register(Op::Sort, K::Collation, Arc::new(sort_collations));
    register_all(
        table,
        &[Op::Filter, Op::Exchange],
        K::Collation,
        Arc::new(passthrough_collations),
    );
    table.register(Op::Project, K::Collation, Arc::new(project_collations));

    table.register_fallback(K::Distribution, Arc::new(|_: &MetadataQuery<'_>, _: &PlanNode, _: &MetadataArgs| {
        Ok(distribution(Distribution::singleton()))
    }));
    table.register(Op::Scan, K::Distribution, Arc::new(scan_distribution));
    table.register(Op::Values, K::Distribution, Arc::new(|_: &MetadataQuery<'_>, _: &PlanNode, _: &MetadataArgs| {
        Ok(distribution(Distribution::broadcast()))
    }));
    table.register(Op::Exchange, K::Distribution, Arc::new(exchange_distribution));
    register_all(
        table,
        &[Op::Filter, Op::Sort],
        K::Distribution,
        Arc::new(passthrough_distribution),
    );
    table.register(Op::Project, K::Distribution, Arc::new(project_distribution));

    table.register_fallback(K::NodeTypes, Arc::new(node_types));
}

fn collations(list: Vec<Collation>) -> Option<MetadataValue> {
    Some(MetadataValue::Collations(list))
}

fn distribution(d: Distribution) -> Option<MetadataValue> {
    Some(MetadataValue::Distribution(d))
}

fn scan_collations(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let list = match mq.scan_descriptor(node) {
        Some(d) if !d.collation.is_empty() => vec![d.collation],
        _ => Vec::new(),
    };
    Ok(collations(list))
}

fn sort_collations(_: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    match node.op() {
        Operator::Sort { collation, .. } => Ok(collations(vec![collation.clone()])),
        _ => Ok(None),
    }
}

fn passthrough_collations(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    match node.children().first() {
        Some(input) => Ok(mq.collations(input)?.and_then(collations)),
        None => Ok(None),
    }
}

fn project_collations(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Project { input, exprs, .. } = node.op() else {
        return Ok(None);
    };
    let list = mq
        .collations(input)?
        .unwrap_or_default()
        .iter()
        .map(|c| c.remap(|field| project_target(exprs, field)))
        .filter(|c| !c.is_empty())
        .collect();
    Ok(collations(list))
}

fn scan_distribution(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let d = mq
        .scan_descriptor(node)
        .and_then(|d| d.distribution)
        .unwrap_or_else(Distribution::singleton);
    Ok(distribution(d))
}

fn exchange_distribution(_: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    match node.op() {
        Operator::Exchange { distribution: d, .. } => Ok(distribution(d.clone())),
        _ => Ok(None),
    }
}

fn passthrough_distribution(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    match node.children().first() {
        Some(input) => Ok(mq.distribution(input)?.and_then(distribution)),
        None => Ok(None),
    }
}

fn project_distribution(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let Operator::Project { input, exprs, .. } = node.op() else {
        return Ok(None);
    };
    let Some(d) = mq.distribution(input)? else {
        return Ok(None);
    };
    let keys: Option<Vec<usize>> = d.keys.iter().map(|k| project_target(exprs, *k)).collect();
    // A hash or range key projected away leaves the placement unknown.
    match keys {
        Some(keys) => Ok(distribution(Distribution { keys, ..d })),
        None => Ok(distribution(Distribution {
            partitions: d.partitions,
            ..Distribution::of(DistributionKind::Any)
        })),
    }
}

fn node_types(mq: &MetadataQuery<'_>, node: &PlanNode, _: &MetadataArgs) -> Out {
    let mut counts = BTreeMap::new();
    *counts.entry(node.kind()).or_insert(0) += 1;
    for child in node.children() {
        let Some(child_counts) = mq.node_types(child)? else {
            return Ok(None);
        };
        for (kind, n) in child_counts {
            *counts.entry(kind).or_insert(0) += n;
        }
    }
    Ok(Some(MetadataValue::NodeTypes(counts)))
}
